use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;

use browser_task_agent::brain::Brain;
use browser_task_agent::config::AgentArgs;
use browser_task_agent::face::{self, Console};
use browser_task_agent::hands::{Worker, WorkerBridge};
use browser_task_agent::{Agent, HaltReason, Outcome, logging};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    logging::init();

    let args = AgentArgs::parse();
    let config = args.agent_config()?;
    let spec = args.worker_spec()?;

    // Fail on a missing key before a browser is launched.
    let brain = Brain::from_env(args.provider, args.model.clone())?;
    tracing::info!(provider = ?args.provider, model = brain.model(), "decision service ready");

    let mut console = Console::new();
    let task = match args.task {
        Some(task) => task,
        None => console.read_line("Enter task: ").await?,
    };
    if task.trim().is_empty() {
        anyhow::bail!("no task given");
    }

    let worker = WorkerBridge::start(&spec)
        .await
        .with_context(|| format!("worker `{}` failed to start", spec.program))?;
    println!("Worker started");

    let mut agent = Agent::new(brain, worker, console, config);
    let mut ctx = agent.context(task);
    let result = agent.run(&mut ctx).await;
    agent.worker.stop().await;

    match result? {
        Outcome::Finished { summary, records } => {
            println!("\nDONE: {summary}");
            face::print_records(&records);
        }
        Outcome::Halted(HaltReason::RepeatedAction { key }) => {
            println!("\nStopped: detected repeated action ({key}).");
        }
        Outcome::Halted(HaltReason::StepBudgetExhausted { steps }) => {
            println!("\nStopped: step limit reached ({steps} steps).");
            if !ctx.records.is_empty() {
                println!("Partial listings:");
                face::print_records(&ctx.records);
            }
        }
    }

    Ok(())
}
