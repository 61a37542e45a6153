mod app;
mod display;
mod local_logger;
mod prelude;
mod project_config;

fn main() {
    if let Err(err) = crate::app::run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
