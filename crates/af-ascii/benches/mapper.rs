use af_ascii::compositor::Compositor;
use af_core::config::{AppearanceSettings, ToneSettings};
use af_core::frame::FrameBuffer;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn noise_frame(width: u32, height: u32) -> FrameBuffer {
    let mut fb = FrameBuffer::new(width, height);
    let mut state = 0x1234_5678u32;
    for byte in &mut fb.data {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        *byte = (state >> 24) as u8;
    }
    fb
}

fn bench_compose(c: &mut Criterion) {
    let compositor = Compositor::new(&AppearanceSettings::default());
    let frame = noise_frame(200, 60);
    let neutral = ToneSettings::default();
    let graded = ToneSettings {
        brightness: 1.1,
        contrast: 1.3,
        saturation: 0.8,
        gamma: 1.8,
    };

    c.bench_function("compose_200x60_neutral", |b| {
        b.iter(|| compositor.compose(black_box(&frame), black_box(&neutral)));
    });
    c.bench_function("compose_200x60_graded", |b| {
        b.iter(|| compositor.compose(black_box(&frame), black_box(&graded)));
    });
}

criterion_group!(benches, bench_compose);
criterion_main!(benches);
