use clap::Parser;
use corus_bench::{init_tracing, Config};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = Config::parse();

    for strategy in config.selected() {
        let workload = config.workload(strategy);
        let measurement = strategy.run(&workload)?;
        println!("{measurement}");
    }
    Ok(())
}
