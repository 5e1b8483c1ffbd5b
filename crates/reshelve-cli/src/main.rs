//! Thin entrypoint for the `reshelve` command.

#[tokio::main]
async fn main() {
    let exit_code = reshelve_cli::run().await;
    std::process::exit(exit_code);
}
