use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use fluentflow::db::{GoalFilter, StudentFilter};
use fluentflow::reports::suggest_tier;
use fluentflow::{init, seed, serve, Config, Database};
use std::io;

#[derive(Parser, Debug)]
#[command(name = "fluentflow")]
#[command(author, version, about = "Practice management for speech-language therapy caseloads")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create .fluentflow/ with a database, config and first API token
    Init,

    /// Start the JSON API server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,
    },

    /// Load the goal bank, optionally with demo students and schedule
    Seed {
        /// Also add demo teachers, classrooms, students, events and holidays
        #[arg(long)]
        demo: bool,
    },

    /// List active students
    Students {
        /// Case-insensitive match on name or grade
        #[arg(short, long)]
        search: Option<String>,
    },

    /// List goal templates
    Goals {
        /// Exact target area, e.g. "Articulation"
        #[arg(short, long)]
        area: Option<String>,

        /// Case-insensitive match on goal text, area, category or description
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Suggest a tier from accuracy, total trials and session count
    Tier {
        accuracy: f64,
        trials: u32,
        sessions: u32,
    },

    /// Mint a new API token and register its hash in the config
    Token,

    /// Print shell completions
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn open_db() -> Database {
    match Database::open() {
        Ok(db) => db,
        Err(e) => fail(&format!(
            "Could not open database at {}: {}",
            Database::db_path().display(),
            e
        )),
    }
}

fn fail(message: &str) -> ! {
    eprintln!("{} {}", "Error:".red().bold(), message);
    std::process::exit(1);
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("FLUENTFLOW_LOG", "info"))
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Init => {
            let cwd = std::env::current_dir()
                .unwrap_or_else(|e| fail(&format!("Could not get current directory: {}", e)));
            if let Err(e) = init::init_project(&cwd) {
                fail(&e);
            }
        }

        Command::Serve { port, host } => {
            let mut config = Config::load();
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            let db = open_db();
            if let Err(e) = serve::start_server(&config, db) {
                fail(&format!("Server error: {}", e));
            }
        }

        Command::Seed { demo } => {
            let db = open_db();
            let result = if demo {
                let config = Config::load();
                seed::seed_demo(&db, chrono::Local::now().date_naive(), &config.defaults)
            } else {
                seed::seed_goal_bank(&db)
            };
            match result {
                Ok(summary) => {
                    println!(
                        "{} {} goals added, {} already present",
                        "Seeded".green(),
                        summary.goals_added,
                        summary.goals_skipped
                    );
                    if demo && summary.demo_skipped {
                        println!("{} demo data (students already exist)", "Skipping".yellow());
                    } else if demo {
                        println!(
                            "{} {} students, {} events, {} holidays",
                            "Seeded".green(),
                            summary.students_added,
                            summary.events_added,
                            summary.holidays_added
                        );
                    }
                }
                Err(e) => fail(&e.to_string()),
            }
        }

        Command::Students { search } => {
            let db = open_db();
            let students = db
                .list_active_students(&StudentFilter { search })
                .unwrap_or_else(|e| fail(&e.to_string()));
            if students.is_empty() {
                println!("No students found.");
            }
            for detail in students {
                println!(
                    "{:>4}  {:<24} grade {:<3} {} goal(s)",
                    detail.student.id,
                    detail.student.name,
                    detail.student.grade,
                    detail.goals.len()
                );
            }
        }

        Command::Goals { area, search } => {
            let db = open_db();
            let goals = db
                .list_goal_templates(&GoalFilter {
                    target_area: area,
                    search,
                })
                .unwrap_or_else(|e| fail(&e.to_string()));
            if goals.is_empty() {
                println!("No goals found.");
            }
            for goal in goals {
                println!(
                    "{:>4}  [{} / {}] {}",
                    goal.id,
                    goal.target_area.cyan(),
                    goal.category,
                    goal.goal_text
                );
            }
        }

        Command::Tier {
            accuracy,
            trials,
            sessions,
        } => {
            if !(0.0..=100.0).contains(&accuracy) {
                fail("accuracy must be between 0 and 100");
            }
            println!("{}", suggest_tier(accuracy, trials, sessions));
        }

        Command::Token => {
            let path = init::default_config_path();
            match init::register_token(&path) {
                Ok(token) => {
                    println!("{} token in {}", "Registered".green(), path.display());
                    println!("{}", token);
                }
                Err(e) => fail(&e),
            }
        }

        Command::Completion { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "fluentflow", &mut io::stdout());
        }
    }
}
