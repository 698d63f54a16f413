// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use criterion::{criterion_group, criterion_main, Criterion};
use edgefirst_video_memory::{
    provider::cpu::CpuProvider, AllocatorConfig, MapFlags, PixelFormat, SurfaceAllocFlags,
    UsageStrategy, VideoAllocator, VideoInfo,
};
use std::sync::Arc;

pub fn benchmark_map(c: &mut Criterion) {
    let strategies = [UsageStrategy::DirectRender, UsageStrategy::NativeFormats];
    let dims = [(640, 480), (1920, 1080), (3840, 2160)];
    let provider = Arc::new(CpuProvider::default());

    for strategy in strategies.iter() {
        let mut group = c.benchmark_group(format!("map/{}", strategy));
        for dim in dims.iter() {
            let allocator = VideoAllocator::new(
                provider.clone(),
                &VideoInfo::new(PixelFormat::Nv12, dim.0, dim.1),
                SurfaceAllocFlags::empty(),
                *strategy,
                &AllocatorConfig::default(),
            )
            .unwrap();
            let memory = allocator.alloc();

            group.bench_function(format!("read-{}x{}", dim.0, dim.1), |b| {
                b.iter(|| memory.map(MapFlags::READ).unwrap().as_slice().len())
            });
            group.bench_function(format!("write-sync-{}x{}", dim.0, dim.1), |b| {
                b.iter(|| {
                    drop(memory.map(MapFlags::WRITE).unwrap());
                    memory.sync().unwrap()
                })
            });
        }
        group.finish();
    }
}

criterion_group!(benches, benchmark_map);
criterion_main!(benches);
