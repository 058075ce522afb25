use budgetboard::args::{Args, BudgetSubcommand, Command, CreateTransactionArgs};
use budgetboard::cache::TransactionsKey;
use budgetboard::model::NewTransaction;
use budgetboard::{commands, Config, Dashboard, Mode, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, error, trace};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();
    init_logger(log_level);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    match main_inner(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting with error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

pub async fn main_inner(args: Args) -> Result<()> {
    trace!("{args:?}");
    let home = args.common().home().path();

    // This allows for testing the program without a Firefly-III server. When
    // BUDGETBOARD_IN_TEST_MODE is set and non-zero in length, then the mode will be Mode::Testing,
    // otherwise it will be Mode::Firefly.
    let mode = Mode::from_env();

    if let Command::Init(init_args) = args.command() {
        commands::init(
            home,
            init_args.upstream_url(),
            init_args.token_file(),
            init_args.time_zone(),
        )
        .await?
        .print();
        return Ok(());
    }

    let config = Config::load(home).await?;
    if let Command::Mcp(_mcp_args) = args.command() {
        commands::mcp(config, mode).await?.print();
        return Ok(());
    }

    // Budget store commands do not need the ledger.
    match args.command() {
        Command::Budget(budget_args) => {
            match budget_args.action() {
                BudgetSubcommand::List => commands::list_budgets(&config).await?.print(),
                BudgetSubcommand::Set(set_args) => {
                    commands::set_budget(&config, set_args).await?.print()
                }
                BudgetSubcommand::Delete(id_args) => {
                    commands::delete_budget(&config, id_args.id()).await?.print()
                }
            }
            return Ok(());
        }
        Command::Allocate(allocate_args) => {
            commands::allocate(
                &config,
                allocate_args.budget(),
                allocate_args.allocations(),
            )
            .await?
            .print();
            return Ok(());
        }
        _ => {}
    }

    let dashboard = Dashboard::from_config(&config, mode).await?;

    // Route to appropriate command handler
    let _: () = match args.command() {
        Command::Init(_) | Command::Mcp(_) | Command::Budget(_) | Command::Allocate(_) => {}

        Command::Summary(summary_args) => commands::summary(&dashboard, summary_args.budget())
            .await?
            .print(),

        Command::Detail(detail_args) => commands::detail(&dashboard, detail_args.id())
            .await?
            .print(),

        Command::Accounts => commands::accounts(&dashboard).await?.print(),

        Command::Categories => commands::categories(&dashboard).await?.print(),

        Command::Transactions(transactions_args) => {
            let key = TransactionsKey {
                page: transactions_args.page().max(1),
                start: transactions_args.start(),
                end: transactions_args.end(),
            };
            commands::transactions(&dashboard, key).await?.print()
        }

        Command::CreateTransaction(create_args) => {
            commands::create_transaction(&dashboard, new_transaction(create_args))
                .await?
                .print()
        }

        Command::NetWorth => commands::net_worth(&dashboard).await?.print(),

        Command::BigPicture => commands::big_picture(&dashboard).await?.print(),
    };
    Ok(())
}

fn new_transaction(args: &CreateTransactionArgs) -> NewTransaction {
    NewTransaction {
        date: args.date(),
        amount: args.amount(),
        description: args.description().to_string(),
        category_id: args.category_id(),
        source_id: args.source_id().map(String::from),
        source_name: args.source_name().map(String::from),
        destination_id: args.destination_id().map(String::from),
        destination_name: args.destination_name().map(String::from),
    }
}

/// Initializes the tracing subscriber.
pub fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => {
            // RUST_LOG exists; use it.
            EnvFilter::from_default_env()
        }
        None => {
            // RUST_LOG does not exist; use default log level for this crate only.
            EnvFilter::new(format!(
                "{}={},{}={}",
                env!("CARGO_CRATE_NAME"),
                level,
                env!("CARGO_BIN_NAME"),
                level
            ))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
