//! davvc-server: WebDAV file server with per-file version control.
//!
//! Clients mount the working tree over WebDAV and can additionally place
//! individual files under version control with the VERSION-CONTROL,
//! CHECKOUT, CHECKIN and UNCHECKOUT methods.
//!
//! # Usage
//!
//! ```bash
//! davvc-server --file-system-path /srv/dav --port 8080
//! ```

use std::process;

use log::error;

use davvc_server::{config, init_logging, serve};

#[tokio::main]
async fn main() {
    let config = match config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to read config: {err}");
            process::exit(1);
        }
    };

    init_logging(config.log_level);

    if let Err(err) = serve(config).await {
        error!("Server error: {}", err);
        process::exit(1);
    }
}
