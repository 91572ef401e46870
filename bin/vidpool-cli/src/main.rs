// Copyright (c) 2025 The vidpool Authors
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # vidpool
//!
//! Command-line interface for the vidpool frame buffer pool.
//!
//! ## Usage
//! ```bash
//! # Run a producer/consumer pipeline over a pooled software device
//! vidpool run --width 1920 --height 1080 --frames 300 --max-buffers 6
//!
//! # Run with a pool configuration from a TOML file
//! vidpool run --config pool.toml --frames 300
//!
//! # Inspect the device capabilities the pool negotiates against
//! vidpool caps
//! ```

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "vidpool",
    about = "Fence-gated frame buffer pool for video pipelines",
    version,
    author
)]
struct Cli {
    /// Path to a TOML pool configuration file (overrides CLI arguments).
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a producer/consumer pipeline against a pooled software device.
    Run {
        /// Frame width in pixels.
        #[arg(long, default_value_t = 1920)]
        width: u32,

        /// Frame height in pixels.
        #[arg(long, default_value_t = 1080)]
        height: u32,

        /// Pixel format: rgba8, bgra8, gray8, nv12, yv12.
        #[arg(short, long, default_value = "rgba8")]
        format: String,

        /// Buffers allocated up front.
        #[arg(long, default_value_t = 2)]
        min_buffers: u32,

        /// Hard ceiling on pool size (0 = unbounded).
        #[arg(long, default_value_t = 6)]
        max_buffers: u32,

        /// Number of frames to push through the pipeline.
        #[arg(short = 'n', long, default_value_t = 300)]
        frames: usize,

        /// Simulated GPU completion latency per fence, in microseconds.
        #[arg(long, default_value_t = 200)]
        fence_latency_us: u64,
    },

    /// Print the capabilities of the backing device.
    Caps,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging based on verbosity.
    commands::init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            width,
            height,
            format,
            min_buffers,
            max_buffers,
            frames,
            fence_latency_us,
        } => commands::run::execute(
            cli.config,
            width,
            height,
            format,
            min_buffers,
            max_buffers,
            frames,
            fence_latency_us,
        ),
        Commands::Caps => commands::caps::execute(),
    }
}
