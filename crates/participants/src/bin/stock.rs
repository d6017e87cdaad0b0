//! Stock service entry point.

use participants::{ServiceKind, serve};

#[tokio::main]
async fn main() {
    serve(ServiceKind::Stock).await;
}
