// Binary entry point for scaffold_guard
// This is a thin wrapper that delegates to the library implementation

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    scaffold_guard::shell::run().await
}
