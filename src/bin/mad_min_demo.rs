use std::error::Error;
use std::thread;
use std::time::Duration;

use madlots::portfolio::synthetic::SyntheticMarket;
use madlots::{spawn, ProblemKind, SolverSettings, Strategy};

/// Solves a random market on a worker thread and logs its progress.
///
/// Usage: `mad_min_demo [assets] [periods] [seed] [max_risk]`. Given a
/// `max_risk`, the return is maximised under that cap instead of minimising
/// risk. Set `RUST_LOG=info` (or `debug`) to see the solver's own logging.
fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let assets = args.first().map(|a| a.parse::<usize>()).transpose()?.unwrap_or(10);
    let periods = args.get(1).map(|a| a.parse::<usize>()).transpose()?.unwrap_or(36);
    let seed = args.get(2).map(|a| a.parse::<u64>()).transpose()?.unwrap_or(2024);
    let max_risk = args.get(3).map(|a| a.parse::<f64>()).transpose()?;

    let mut statement = SyntheticMarket::new(assets, periods)
        .statement(seed)?
        .with_time_limit(Duration::from_secs(30));
    let kind = match max_risk {
        Some(gamma) => {
            statement = statement.with_max_risk(gamma);
            ProblemKind::MadMax
        }
        None => ProblemKind::MadMin,
    };
    let strategy = Strategy::for_kind(kind, &statement, SolverSettings::default())?;

    let handle = spawn(strategy);
    while !handle.is_finished() {
        let current = handle.current();
        log::info!(
            "{}: objective {:.6e}, gap {:.3e}, {} nodes",
            current.status,
            current.objective_value,
            current.accuracy,
            current.nodes
        );
        thread::sleep(Duration::from_millis(200));
    }
    let solution = handle.join()?;

    println!("status:   {}", solution.status);
    println!("risk:     {:.6e}", solution.risk_value);
    println!("return:   {:.6e}", solution.return_value);
    println!("invested: {:.2}", solution.total_cost);
    for (asset, (lots, weight)) in solution.lots.iter().zip(&solution.weights).enumerate() {
        if *lots > 0 {
            println!("  asset {:>3}: {:>4} lots, weight {:.4}", asset, lots, weight);
        }
    }
    Ok(())
}
