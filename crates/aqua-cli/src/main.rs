mod telemetry;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use aqua_core::{
    AuthUser, EducationLevel, ExperienceYears, FilterCriteria, FilterError, MinRating, Skill,
    WorkerId, WorkerProfile, PRICE_CEILING, PRICE_FLOOR,
};
use aqua_session::{
    BookingConfirmation, BookingField, ClientConfig, Notice, NoticeLevel, SearchOutcome,
    WorkerSearch,
};
use aqua_storage::{AuthStore, FileIdentityStorage, HttpDirectory};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "aqua")]
#[command(about = "Search the worker marketplace and book a worker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the query parameters a search would send.
    Query(FilterArgs),
    /// Run one search and list the matching workers.
    Search {
        #[command(flatten)]
        filters: FilterArgs,
        #[arg(long)]
        json: bool,
    },
    /// Search, select a worker and submit a booking.
    Book(BookArgs),
    /// Store the identity record from a JSON file.
    Login {
        #[arg(long)]
        file: PathBuf,
    },
    Logout,
    Whoami,
}

#[derive(Debug, Default, Args)]
struct FilterArgs {
    /// Free-text search.
    #[arg(long, short = 'q')]
    query: Option<String>,
    #[arg(long)]
    skill: Option<String>,
    #[arg(long)]
    city: Option<String>,
    #[arg(long)]
    state: Option<String>,
    /// Minimum rating: 3, 4 or 4.5.
    #[arg(long)]
    min_rating: Option<String>,
    #[arg(long)]
    min_price: Option<u32>,
    #[arg(long)]
    max_price: Option<u32>,
    /// Minimum years of experience: 1, 3, 5 or 10.
    #[arg(long)]
    experience: Option<String>,
    #[arg(long)]
    education: Option<String>,
}

impl FilterArgs {
    fn to_criteria(&self) -> Result<FilterCriteria, FilterError> {
        let mut criteria = FilterCriteria::new();
        if let Some(text) = &self.query {
            criteria.set_free_text(text.trim());
        }
        if let Some(raw) = &self.skill {
            criteria.set_skill(Skill::parse_filter(raw)?);
        }
        if let Some(city) = &self.city {
            criteria.set_city(city.trim());
        }
        if let Some(state) = &self.state {
            criteria.set_state(state.trim());
        }
        if let Some(raw) = &self.min_rating {
            criteria.set_min_rating(MinRating::parse_filter(raw)?);
        }
        if self.min_price.is_some() || self.max_price.is_some() {
            criteria.set_price_range(
                self.min_price.unwrap_or(PRICE_FLOOR),
                self.max_price.unwrap_or(PRICE_CEILING),
            )?;
        }
        if let Some(raw) = &self.experience {
            criteria.set_min_experience(ExperienceYears::parse_filter(raw)?);
        }
        if let Some(raw) = &self.education {
            criteria.set_education(EducationLevel::parse_filter(raw)?);
        }
        Ok(criteria)
    }
}

/// `--city`/`--state` here describe the job location, so the search side of
/// a booking only takes the free-text and skill filters.
#[derive(Debug, Args)]
struct BookArgs {
    #[arg(long)]
    worker: String,
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: String,
    #[arg(long)]
    address: String,
    #[arg(long)]
    city: String,
    #[arg(long)]
    state: String,
    #[arg(long, short = 'q')]
    query: Option<String>,
    #[arg(long)]
    skill: Option<String>,
    /// Print the confirmation and notices as JSON.
    #[arg(long)]
    json: bool,
}

impl BookArgs {
    fn filters(&self) -> FilterArgs {
        FilterArgs {
            query: self.query.clone(),
            skill: self.skill.clone(),
            ..FilterArgs::default()
        }
    }

    fn fields(&self) -> [(BookingField, &str); 5] {
        [
            (BookingField::Title, self.title.as_str()),
            (BookingField::Description, self.description.as_str()),
            (BookingField::Address, self.address.as_str()),
            (BookingField::City, self.city.as_str()),
            (BookingField::State, self.state.as_str()),
        ]
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ClientConfig::from_env();
    telemetry::init(&config.log_filter)?;
    debug!(api_url = %config.api_url, state_dir = %config.state_dir.display(), "client configured");

    match cli.command {
        Commands::Query(filters) => {
            let query = filters.to_criteria()?.to_query();
            if query.is_empty() {
                println!("(no parameters)");
            }
            for (key, value) in query.pairs() {
                println!("{key}={value}");
            }
        }
        Commands::Search { filters, json } => {
            let criteria = filters.to_criteria()?;
            let auth = load_identity(&config).await?;
            let screen = open_screen(&config, &auth)?;
            screen.edit_filters(|f| *f = criteria);
            let outcome = screen.search().await;
            let notices = screen.take_notices();
            let workers = screen.results();

            if json {
                let report = SearchReport {
                    workers: &workers,
                    notices: &notices,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_notices(&notices);
            }
            if let SearchOutcome::Failed { error, .. } = outcome {
                bail!("search failed: {error}");
            }
            if !json {
                if workers.is_empty() {
                    println!("no workers match these filters");
                }
                for worker in &workers {
                    println!("{}", worker_line(worker));
                }
            }
        }
        Commands::Book(args) => {
            let criteria = args.filters().to_criteria()?;
            let auth = load_identity(&config).await?;
            let screen = open_screen(&config, &auth)?;
            screen.edit_filters(|f| *f = criteria);
            if let SearchOutcome::Failed { error, .. } = screen.search().await {
                print_notices(&screen.take_notices());
                bail!("search failed: {error}");
            }

            screen
                .select_worker(&WorkerId::new(args.worker.as_str()))
                .context("cannot book this worker")?;
            for (field, value) in args.fields() {
                screen.update_booking(field, value)?;
            }
            let submitted = screen.submit_booking().await;
            let notices = screen.take_notices();

            if args.json {
                let report = BookingReport {
                    confirmation: submitted.as_ref().ok(),
                    notices: &notices,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_notices(&notices);
            }
            let confirmation = submitted?;
            if !args.json {
                if let Some(order_id) = confirmation.order_id {
                    println!("order {order_id}");
                }
            }
        }
        Commands::Login { file } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let user: AuthUser = serde_json::from_str(&text)
                .with_context(|| format!("{} is not a user record", file.display()))?;
            let label = format!("{} <{}>", user.name, user.email);
            let mut auth = load_identity(&config).await?;
            auth.set_user(user).await?;
            println!("logged in as {label}");
        }
        Commands::Logout => {
            let mut auth = load_identity(&config).await?;
            auth.logout().await?;
            println!("logged out");
        }
        Commands::Whoami => match load_identity(&config).await?.user() {
            Some(user) => println!("{} <{}> ({})", user.name, user.email, user.kind),
            None => println!("not logged in"),
        },
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct SearchReport<'a> {
    workers: &'a [WorkerProfile],
    notices: &'a [Notice],
}

#[derive(Debug, Serialize)]
struct BookingReport<'a> {
    confirmation: Option<&'a BookingConfirmation>,
    notices: &'a [Notice],
}

/// Reads the stored identity; an unreadable file counts as signed out so
/// `login` and `logout` can always replace it.
async fn load_identity(config: &ClientConfig) -> Result<AuthStore<FileIdentityStorage>> {
    AuthStore::load_or_sign_out(FileIdentityStorage::in_dir(&config.state_dir))
        .await
        .context("failed to load stored identity")
}

fn open_screen(
    config: &ClientConfig,
    auth: &AuthStore<FileIdentityStorage>,
) -> Result<WorkerSearch<HttpDirectory>> {
    let token = auth.bearer_token().map(ToString::to_string);
    let directory = HttpDirectory::new(config.http_client_config(token))?;
    Ok(WorkerSearch::new(directory))
}

fn print_notices(notices: &[Notice]) {
    for notice in notices {
        let tag = match notice.level {
            NoticeLevel::Success => "ok",
            NoticeLevel::Error => "error",
        };
        eprintln!("[{tag}] {}: {}", notice.title, notice.description);
    }
}

fn worker_line(worker: &WorkerProfile) -> String {
    let mut parts = vec![
        worker.id.to_string(),
        worker.name.clone(),
        format!("{:.1} ({})", worker.rating, worker.rating_count),
    ];
    parts.extend(worker.location_label());
    if let Some(rate) = worker.hourly_rate {
        parts.push(format!("${rate:.0}/hr"));
    }
    parts.extend(worker.experience_label());
    parts.push(match worker.contact_phone() {
        Some(phone) => phone.to_string(),
        None if worker.is_broker_managed() => "via broker".to_string(),
        None => "-".to_string(),
    });
    parts.join("  ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("aqua").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn filter_flags_build_criteria() {
        let Commands::Query(filters) = parse(&[
            "query",
            "--skill",
            "plumbing",
            "--city",
            "Austin",
            "--min-rating",
            "4",
        ])
        .command
        else {
            panic!("expected query command");
        };

        let query = filters.to_criteria().unwrap().to_query();
        assert_eq!(query.to_string(), "skills=plumbing&city=Austin&rating=4");
    }

    #[test]
    fn single_price_bound_is_completed_with_the_default() {
        let filters = FilterArgs {
            max_price: Some(40),
            ..FilterArgs::default()
        };
        let query = filters.to_criteria().unwrap().to_query();
        assert_eq!(query.get("minPrice"), Some("0"));
        assert_eq!(query.get("maxPrice"), Some("40"));
    }

    #[test]
    fn unknown_skill_is_rejected() {
        let filters = FilterArgs {
            skill: Some("juggling".into()),
            ..FilterArgs::default()
        };
        assert!(filters.to_criteria().is_err());
    }

    #[test]
    fn book_location_flags_do_not_filter_the_search() {
        let Commands::Book(args) = parse(&[
            "book",
            "--worker",
            "w1",
            "--title",
            "Fix sink",
            "--description",
            "leaky pipe",
            "--address",
            "1 Main St",
            "--city",
            "Austin",
            "--state",
            "TX",
            "--skill",
            "plumbing",
        ])
        .command
        else {
            panic!("expected book command");
        };

        let query = args.filters().to_criteria().unwrap().to_query();
        assert_eq!(query.to_string(), "skills=plumbing");
        assert_eq!(args.fields()[3], (BookingField::City, "Austin"));
    }

    #[tokio::test]
    async fn unreadable_identity_reads_as_signed_out_and_logout_repairs_it() {
        let dir = tempdir().expect("tempdir");
        let state_dir = dir.path().to_string_lossy().into_owned();
        let config = ClientConfig::from_lookup(|key| {
            (key == "AQUA_STATE_DIR").then(|| state_dir.clone())
        });
        let file = dir.path().join(aqua_storage::IDENTITY_FILE);
        std::fs::write(&file, "{not json").unwrap();

        let mut auth = load_identity(&config).await.unwrap();
        assert!(auth.user().is_none());

        auth.logout().await.unwrap();
        let stored: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&file).unwrap()).unwrap();
        assert_eq!(stored["state"]["user"], serde_json::Value::Null);
    }

    #[test]
    fn search_report_carries_notices() {
        let notices = [Notice::error(
            aqua_session::SEARCH_ERROR_TITLE,
            aqua_session::SEARCH_ERROR_MESSAGE,
        )];
        let report = SearchReport {
            workers: &[],
            notices: &notices,
        };

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["workers"], serde_json::json!([]));
        assert_eq!(value["notices"][0]["level"], "error");
        assert_eq!(value["notices"][0]["title"], "Search Error");
        assert!(value["notices"][0]["raised_at"].is_string());
    }
}
