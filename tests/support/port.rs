use std::net::TcpListener;

use anyhow::{Context as _, Result};

pub fn get_available_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("bind ephemeral port")?;
    let port = listener.local_addr().context("read local addr")?.port();
    Ok(port)
}
