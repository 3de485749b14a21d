use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use common::{JobKey, Request, Response};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Daemon control socket
    #[arg(long, default_value = common::DEFAULT_SOCKET_PATH)]
    socket: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Email a report now (history, reporter, simmon or status)
    SendNow {
        key: JobKey,
    },
    /// Make a job re-read its settings
    Reload {
        key: JobKey,
    },
    /// Print the current configuration
    Config,
    /// List the report jobs and their schedules
    Jobs,
    /// Print the backup history
    History,
}

fn request_for(command: Commands) -> Request {
    match command {
        Commands::SendNow { key } => Request::SendNow(key),
        Commands::Reload { key } => Request::ReloadJob(key),
        Commands::Config => Request::GetConfig,
        Commands::Jobs => Request::ListJobs,
        Commands::History => Request::GetHistory,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let stream = UnixStream::connect(&cli.socket)
        .await
        .with_context(|| format!("Cannot reach the reporter daemon at {:?}", cli.socket))?;
    let (reader, mut writer) = stream.into_split();

    let mut req_bytes = serde_json::to_vec(&request_for(cli.command))?;
    req_bytes.push(b'\n');
    writer.write_all(&req_bytes).await?;

    let line = BufReader::new(reader)
        .lines()
        .next_line()
        .await?
        .ok_or_else(|| anyhow!("Daemon closed the connection without answering"))?;
    let resp: Response = serde_json::from_str(&line)?;

    match resp {
        Response::Ok => println!("Success"),
        Response::Error(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        Response::Config(config) => println!("{}", serde_json::to_string_pretty(&config)?),
        Response::JobList(jobs) => {
            println!("{:<10} {:<8} {:<20} {:<20}", "Job", "Enabled", "Schedule", "Next");
            for job in jobs {
                println!(
                    "{:<10} {:<8} {:<20} {:<20}",
                    job.key,
                    if job.enabled { "yes" } else { "no" },
                    job.schedule,
                    job.next.as_deref().unwrap_or("-")
                );
            }
        }
        Response::HistoryList(history) => {
            println!("{:<20} {:<20} {:>10} {:>10} {:>14}", "Server Time", "Status File Time", "Files", "Missing", "Missing Bytes");
            for entry in history {
                println!(
                    "{:<20} {:<20} {:>10} {:>10} {:>14}",
                    entry.server_time, entry.acer_time_stamp, entry.acer_files, entry.missing_files, entry.missing_bytes
                );
            }
        }
    }

    Ok(())
}
