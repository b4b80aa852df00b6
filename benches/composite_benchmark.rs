//! Composite generation and PackBits benchmarks

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{Rgba, RgbaImage};
use psdview_lib::file::psd::compression::{pack_plane, unpack_plane};
use psdview_lib::render::{
    Capabilities, CompositeGenerator, CompositeSource, LayerBitmap, LayerEntry, SourceError,
};

/// Layer stack with no built-in composite, forcing manual composition
struct LayerStack {
    size: u32,
    layers: Vec<RgbaImage>,
}

impl LayerStack {
    fn new(size: u32, count: usize) -> Self {
        let layers = (0..count)
            .map(|i| {
                let shade = (i * 40 % 256) as u8;
                RgbaImage::from_fn(size / 2, size / 2, |x, _| {
                    Rgba([shade, (x % 256) as u8, 255 - shade, 180])
                })
            })
            .collect();
        Self { size, layers }
    }
}

impl CompositeSource for LayerStack {
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn header_dimensions(&self) -> Option<(u32, u32)> {
        Some((self.size, self.size))
    }

    fn layers(&self) -> Vec<LayerEntry> {
        self.layers
            .iter()
            .enumerate()
            .map(|(index, img)| LayerEntry {
                index,
                name: format!("Layer {}", index),
                visible: true,
                opacity: 200,
                width: img.width(),
                height: img.height(),
            })
            .collect()
    }

    fn render_layer(&self, index: usize) -> Result<LayerBitmap, SourceError> {
        let offset = (index as i32 * 17) % (self.size as i32 / 2);
        Ok(LayerBitmap {
            image: self.layers[index].clone(),
            left: offset,
            top: offset,
        })
    }
}

fn benchmark_manual_composition(c: &mut Criterion) {
    let mut group = c.benchmark_group("Manual Composition");
    group.sample_size(20);

    for count in [4, 16, 64].iter() {
        let source = LayerStack::new(1024, *count);

        for parallel in [false, true] {
            let generator = CompositeGenerator::new(parallel);
            let label = if parallel { "parallel" } else { "sequential" };
            group.bench_with_input(BenchmarkId::new(label, count), &source, |b, source| {
                b.iter(|| generator.generate(source))
            });
        }
    }

    group.finish();
}

fn benchmark_packbits(c: &mut Criterion) {
    let mut group = c.benchmark_group("PackBits");
    let width = 2048usize;
    let height = 256usize;

    // Flat runs with a noisy band, like a mostly empty layer
    let plane: Vec<u8> = (0..width * height)
        .map(|i| if (i / width) % 8 == 0 { (i * 31 % 251) as u8 } else { 0 })
        .collect();
    let (counts, data) = pack_plane(&plane, width);

    group.bench_function("pack_plane", |b| b.iter(|| pack_plane(&plane, width)));
    group.bench_function("unpack_plane", |b| {
        b.iter(|| unpack_plane(&counts, &data, width, height))
    });

    group.finish();
}

criterion_group!(benches, benchmark_manual_composition, benchmark_packbits);
criterion_main!(benches);
