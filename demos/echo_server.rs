//! Line-oriented chat/echo server.
//!
//! Every line a client sends is echoed back with `!` appended. Joins and
//! departures are announced to everyone. Sending `shutdown` stops the
//! server.
//!
//! ```text
//! cargo run --example echo_server -- 7000
//! nc 127.0.0.1 7000
//! ```

use corral::{Hook, ServerBuilder};

fn main() -> corral::Result<()> {
    tracing_subscriber::fmt::init();

    let port = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(7000);

    let server = ServerBuilder::new()
        .port(port)
        .on_join(|ctx| {
            let address = ctx.connection().address().to_string();
            ctx.write_str("welcome\n");
            let others = ctx.connection_count() - 1;
            ctx.broadcast_str(&format!("* {} joined ({} others here)\n", address, others));
            true
        })
        .on_leave(|ctx| {
            let address = ctx.connection().address().to_string();
            ctx.broadcast_str(&format!("* {} left\n", address));
        })
        .on_data(|ctx, window| {
            while let Some(end) = window.unread().iter().position(|&b| b == b'\n') {
                let line = window.unread()[..end].to_vec();
                window.consume(end + 1);
                let line = String::from_utf8_lossy(&line);
                let line = line.trim_end_matches('\r');
                if line == "shutdown" {
                    ctx.write_str("bye\n");
                    if let Err(e) = ctx.stop() {
                        tracing::warn!("echo_server: stop failed: {}", e);
                    }
                    return;
                }
                ctx.write_str(&format!("{}!\n", line));
            }
        })
        .build()?;

    server.set_hook(Hook::pre_write(|_ctx, payload| {
        tracing::trace!("echo_server: flushing {} bytes", payload.len());
    }))?;

    server.start()?;
    tracing::info!("echo_server: listening on {:?}", server.local_addr());
    server.wait()?;
    server.free()
}
