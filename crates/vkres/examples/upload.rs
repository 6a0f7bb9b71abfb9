//! Uploads a generated texture through the staging path, builds its mip
//! chain and times the work with timestamp queries.
//!
//! ```sh
//! RUST_LOG=vkres=debug cargo run --example upload
//! cargo run --example upload -- --size 1024 --iterations 8
//! ```

use std::time::Instant;

use ash::vk;
use tracing_subscriber::EnvFilter;
use vkres::gpu::VulkanContext;
use vkres::image::{ImageHelper, ImageIndex, TextureType};
use vkres::{
    Context, DynamicQueryPool, Format, LineLoopHelper, PixelUnpackState, ResourceConfig,
};

struct Args {
    size: u32,
    iterations: usize,
}

fn parse_args() -> Args {
    let mut args = Args {
        size: 256,
        iterations: 4,
    };

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < raw.len() {
        match raw[i].as_str() {
            "--size" => {
                i += 1;
                args.size = raw[i].parse().expect("invalid --size");
            }
            "--iterations" => {
                i += 1;
                args.iterations = raw[i].parse().expect("invalid --iterations");
            }
            "-h" | "--help" => {
                eprintln!("Usage: upload [--size N] [--iterations N]");
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                std::process::exit(1);
            }
        }
        i += 1;
    }
    args
}

/// RGB gradient, three bytes per pixel and tightly packed rows.
fn gradient(size: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((size * size * 3) as usize);
    for y in 0..size {
        for x in 0..size {
            pixels.extend_from_slice(&[
                (x * 255 / size.max(1)) as u8,
                (y * 255 / size.max(1)) as u8,
                0x80,
            ]);
        }
    }
    pixels
}

fn main() -> vkres::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = parse_args();
    let mut ctx = VulkanContext::new(ResourceConfig::default())?;
    let mut timestamps = DynamicQueryPool::new(ctx.config(), vk::QueryType::TIMESTAMP, 8);
    let mut line_loop = LineLoopHelper::new(&ctx);

    let extent = vk::Extent3D {
        width: args.size,
        height: args.size,
        depth: 1,
    };
    let mip_levels = 32 - args.size.max(1).leading_zeros();
    let pixels = gradient(args.size);
    // Bound once per frame by a real renderer; here it only exercises the
    // index suballocator.
    let outline = line_loop.index_buffer_for_draw_arrays(&mut ctx, 4, 0)?;
    println!("line loop indices at offset {}", outline.offset);

    for iteration in 0..args.iterations {
        let started = Instant::now();

        let mut image = ImageHelper::new(&ctx);
        image.init(
            ctx.device(),
            TextureType::TwoD,
            extent,
            &Format::RGB8,
            vk::SampleCountFlags::TYPE_1,
            vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED,
            mip_levels,
            1,
        )?;
        image.init_memory(ctx.device(), vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        image.stage_subresource_update(
            &ctx,
            &ImageIndex::level(0),
            extent,
            vk::Offset3D::default(),
            &Format::RGB8,
            &PixelUnpackState {
                alignment: 1,
                ..Default::default()
            },
            &pixels,
        )?;

        let mut begin = timestamps.allocate_query(&ctx)?;
        let mut end = timestamps.allocate_query(&ctx)?;

        let mut cmd = ctx.begin_command_buffer()?;
        begin.write_timestamp(&mut cmd);
        image.flush_staged_updates(&mut ctx, 0, 1, &mut cmd)?;
        image.generate_mipmaps_with_blit(mip_levels - 1, &mut cmd);
        end.write_timestamp(&mut cmd);
        let serial = ctx.submit(cmd)?;

        image.release_image(&mut ctx);
        image.release_staging_buffer(&mut ctx);
        ctx.finish()?;

        let mut ticks = [[0u64; 1]; 2];
        for (query, slot) in [&begin, &end].into_iter().zip(ticks.iter_mut()) {
            unsafe {
                ctx.vulkan_device().raw().get_query_pool_results(
                    query.query_pool(),
                    query.query(),
                    slot,
                    vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
                )
            }
            .map_err(|result| vkres::ResourceError::Vulkan {
                call: "vkGetQueryPoolResults",
                result,
            })?;
        }
        let period = ctx.device().limits().timestamp_period as f64;
        let gpu_micros = ticks[1][0].saturating_sub(ticks[0][0]) as f64 * period / 1000.0;

        println!(
            "iteration {iteration}: serial {serial}, {mip_levels} levels, gpu {gpu_micros:.1} us, wall {:.2?}",
            started.elapsed()
        );

        timestamps.free_query(&ctx, begin);
        timestamps.free_query(&ctx, end);
    }

    line_loop.release(&mut ctx);
    ctx.finish()?;
    timestamps.destroy(ctx.device());
    Ok(())
}
