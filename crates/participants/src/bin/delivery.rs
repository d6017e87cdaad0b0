//! Delivery service entry point.

use participants::{ServiceKind, serve};

#[tokio::main]
async fn main() {
    serve(ServiceKind::Delivery).await;
}
