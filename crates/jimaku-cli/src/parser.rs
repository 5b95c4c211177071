//! Command-line argument definitions.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "jimaku", about = "Media subtitle analysis pipeline", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API server.
    Serve {
        /// Port to listen on (overrides JIMAKU_HTTP_PORT).
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run stage workers consuming the work queues.
    Work {
        /// Queue to consume: download, transcribe, enrich, or default
        /// (all queues).
        #[arg(long, default_value = "default")]
        queue: String,

        /// Concurrent workers per queue.
        #[arg(long, default_value_t = 2)]
        workers: usize,
    },

    /// Delete terminal tasks older than the cutoff.
    Prune {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_work_defaults() {
        let cli = Cli::try_parse_from(["jimaku", "work"]).unwrap();
        match cli.command {
            Commands::Work { queue, workers } => {
                assert_eq!(queue, "default");
                assert_eq!(workers, 2);
            }
            _ => panic!("expected work command"),
        }
    }

    #[test]
    fn parses_serve_with_port() {
        let cli = Cli::try_parse_from(["jimaku", "serve", "--port", "9001"]).unwrap();
        match cli.command {
            Commands::Serve { port } => assert_eq!(port, Some(9001)),
            _ => panic!("expected serve command"),
        }
    }
}
