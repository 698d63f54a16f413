// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_video_memory::{
    format::{PixelFormat, VideoInfo},
    pool::ObjectPool,
    provider::{cpu::CpuProvider, SurfaceAllocFlags, SurfaceObject, SurfaceProvider},
    SurfaceProxy,
};
use std::{
    error::Error,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

#[test]
fn test_concurrent_accounting() -> Result<(), Box<dyn Error>> {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    let pool = ObjectPool::new("test", 4, move || Ok(counter.fetch_add(1, Ordering::SeqCst)))?;

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..200 {
                    if let Ok(Some(object)) = pool.acquire() {
                        assert!(pool.in_use() <= pool.capacity());
                        drop(object);
                    }
                }
            });
        }
    });

    assert_eq!(pool.in_use(), 0);
    assert!(created.load(Ordering::SeqCst) <= 4);
    assert_eq!(pool.available(), created.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn test_surface_pool() -> Result<(), Box<dyn Error>> {
    let provider = Arc::new(CpuProvider::default());
    let info = VideoInfo::new(PixelFormat::Nv12, 320, 240);
    let factory = {
        let provider = provider.clone();
        move || provider.create_surface_full(&info, SurfaceAllocFlags::empty())
    };
    let pool = ObjectPool::new("surface", 2, factory)?;

    let a = SurfaceProxy::from_pool(&pool)?;
    let b = SurfaceProxy::from_pool(&pool)?;
    assert_ne!(a.surface_id(), b.surface_id());
    assert!(SurfaceProxy::from_pool(&pool).is_err());

    // the surface only returns once every proxy clone is gone
    let id = a.surface_id();
    let clone = a.clone();
    drop(a);
    assert_eq!(pool.in_use(), 2);
    drop(clone);
    assert_eq!(pool.in_use(), 1);

    let c = SurfaceProxy::from_pool(&pool)?;
    assert_eq!(c.surface_id(), id);
    assert_eq!(c.surface().format(), PixelFormat::Nv12);
    assert_eq!(provider.stats().surfaces, 2);
    drop(b);
    Ok(())
}
