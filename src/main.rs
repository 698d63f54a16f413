// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use args::Args;
use clap::Parser;
use edgefirst_video_memory::{
    provider::cpu::{CpuProvider, CpuProviderStats},
    AllocatorConfig, DmaBufAllocator, MapFlags, SurfaceAllocFlags, UsageStrategy, VideoAllocator,
    VideoInfo,
};
use serde_json::json;
use std::{error::Error, io, sync::Arc, time::Instant};
use tracing::{debug, info, info_span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

mod args;

fn init_tracing(args: &Args) -> Result<(), Box<dyn Error>> {
    let default = if args.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default))?;

    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_filter(env_filter);

    let journald = match args.journald {
        true => Some(tracing_journald::layer()?),
        false => None,
    };

    let tracy = match args.tracy {
        true => {
            tracy_client::Client::start();
            Some(tracing_tracy::TracyLayer::default())
        }
        false => None,
    };

    tracing_subscriber::registry()
        .with(stderr)
        .with(journald)
        .with(tracy)
        .try_init()?;
    Ok(())
}

fn info_json(info: &VideoInfo) -> serde_json::Value {
    let planes: Vec<_> = (0..info.n_planes())
        .map(|plane| json!({ "offset": info.offset(plane), "stride": info.stride(plane) }))
        .collect();
    json!({
        "format": info.format().to_string(),
        "width": info.width(),
        "height": info.height(),
        "size": info.size(),
        "planes": planes,
    })
}

fn stats_json(stats: &CpuProviderStats) -> serde_json::Value {
    json!({
        "surfaces": stats.surfaces,
        "images": stats.images,
        "derived": stats.derived,
        "downloads": stats.downloads,
        "uploads": stats.uploads,
        "exports": stats.exports,
    })
}

/// Write a pattern, push it to the surface and read it back through a soft
/// copy, which sees the surface and not the written image.
fn round_trip(
    allocator: &VideoAllocator<CpuProvider>,
    index: usize,
) -> Result<(), Box<dyn Error>> {
    let _span = info_span!("round_trip", index).entered();
    let pattern = (index % 251) as u8 + 1;

    let memory = allocator.alloc();
    {
        let mut map = memory.map(MapFlags::WRITE)?;
        map.as_mut_slice()?.fill(pattern);
    }
    memory.sync()?;

    let copy = memory.copy(0, None)?;
    let map = copy.map(MapFlags::READ)?;
    let info = allocator.image_info();
    for plane in 0..info.n_planes() {
        let format = info.format();
        let rows = format.plane_height(plane, info.height());
        let row_bytes = format.plane_row_bytes(plane, info.width());
        for row in 0..rows {
            let start = info.offset(plane) + row * info.stride(plane);
            let data = &map.as_slice()[start..start + row_bytes];
            if data.iter().any(|&byte| byte != pattern) {
                return Err(format!("round trip {index}: plane {plane} row {row} differs").into());
            }
        }
    }
    debug!("round trip {index} verified with {:?}", memory.usage_flag());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(&args)?;

    let provider = Arc::new(
        CpuProvider::builder()
            .backend(args.backend.into())
            .native_formats(args.native_formats.iter().copied())
            .pitch_alignment(args.pitch_alignment)
            .derive_images(!args.no_derive)
            .build(),
    );

    let info = args.video_info()?;
    let start = Instant::now();
    let allocator = VideoAllocator::new(
        provider.clone(),
        &info,
        SurfaceAllocFlags::empty(),
        args.strategy.into(),
        &AllocatorConfig::from(&args),
    )?;
    info!("allocator configured in {:?}", start.elapsed());

    for index in 0..args.round_trips {
        round_trip(&allocator, index)?;
    }

    let mut exports = Vec::with_capacity(args.dma_exports);
    if args.dma_exports > 0 {
        let dma = DmaBufAllocator::new(provider.clone(), &info, SurfaceAllocFlags::empty())?;
        for _ in 0..args.dma_exports {
            let memory = dma.alloc()?;
            debug!("exported {memory}");
            exports.push(memory);
        }
    }

    let stats = provider.stats();
    if args.json {
        let report = json!({
            "backend": provider.backend().to_string(),
            "requested": UsageStrategy::from(args.strategy).to_string(),
            "usage": allocator.usage_flag().to_string(),
            "video_info": info_json(allocator.video_info()),
            "surface_info": info_json(allocator.surface_info()),
            "image_info": info_json(allocator.image_info()),
            "round_trips": args.round_trips,
            "exports": exports.iter().map(|m| m.size()).collect::<Vec<_>>(),
            "stats": stats_json(&stats),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("backend:      {}", provider.backend());
        println!("usage:        {}", allocator.usage_flag());
        println!("video info:   {}", allocator.video_info());
        println!("surface info: {}", allocator.surface_info());
        println!("image info:   {}", allocator.image_info());
        println!("round trips:  {}", args.round_trips);
        for memory in &exports {
            println!("export:       {memory}");
        }
        println!("stats:        {stats:?}");
    }

    Ok(())
}
