//! sequential / parallel 批量预处理对照实验.

mod result;
mod runner;

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    runner::run().analyze();
}
