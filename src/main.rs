#[macro_use]
extern crate tracing;

mod app;
mod cli;

#[tokio::main]
async fn main() {
    if let Err(e) = app::run::main_with_error().await {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}
