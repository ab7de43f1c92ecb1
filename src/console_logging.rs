// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    io::Write,
    sync::atomic::{AtomicBool, Ordering},
};

use env_logger::{Builder, Env};

static INITIALISED: AtomicBool = AtomicBool::new(false);

/// Sends log output to the console. The filter is taken from `RUST_OPCUA_LOG` and defaults to
/// `info`. Only the first call has any effect.
pub fn init() {
    if INITIALISED.swap(true, Ordering::Relaxed) {
        return;
    }
    // This is env_logger::init() but taking logging values from RUST_OPCUA_LOG instead of
    // RUST_LOG, which cargo and other rust tools fill with their own settings.
    let mut builder = Builder::from_env(Env::new().filter_or("RUST_OPCUA_LOG", "info"));
    builder.format(|f, record| {
        let now = chrono::Utc::now();
        writeln!(
            f,
            "{} - {:<5} - {} - {}",
            now.format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });
    if let Err(err) = builder.try_init() {
        eprintln!("Logger error, check error = {}", err);
    } else {
        info!("Logging is enabled, use RUST_OPCUA_LOG environment variable to control filtering, logging level");
    }
}
