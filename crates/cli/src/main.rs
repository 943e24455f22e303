use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;

use careplan_core::billing::{self, BillingEligibility};
use careplan_core::config::{ConfigSettings, CoreConfig};
use careplan_core::review_policy::{ApprovalRequest, ReviewPolicy, ReviewRoute};
use careplan_core::status::{CarePlanStatus, Transition};
use careplan_core::tenant::InterpreterReviewMode;
use careplan_core::CarePlanResult;
use careplan_types::LanguageCode;

#[derive(Parser)]
#[command(name = "careplan")]
#[command(about = "Care plan engine policy and billing tools")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the care plan transition table
    Transitions,
    /// Show where an approval from pending_review would go
    Route {
        /// Tenant interpreter review mode (disabled, optional, required)
        mode: String,
        /// Target language of the plan
        language: String,
        /// Ask to skip interpreter review
        #[arg(long)]
        skip: bool,
        /// Justification recorded when skipping an optional review
        #[arg(long)]
        justification: Option<String>,
        /// Review-exempt languages (comma-separated, default from configuration)
        #[arg(long)]
        exempt: Option<String>,
    },
    /// Calculate TCM billing eligibility
    Billing {
        /// When the plan was sent (RFC 3339)
        sent_at: String,
        /// When the patient first answered a check-in (RFC 3339)
        #[arg(long)]
        responded_at: Option<String>,
        /// Current plan status
        #[arg(long, default_value = "sent")]
        status: String,
    },
    /// Validate configuration and print the resolved values
    Config {
        /// YAML settings file (defaults to CAREPLAN_CONFIG_FILE)
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Transitions) => print!("{}", transition_table()),
        Some(Commands::Route {
            mode,
            language,
            skip,
            justification,
            exempt,
        }) => match route(&mode, &language, skip, justification, exempt.as_deref()) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("Error routing approval: {}", e),
        },
        Some(Commands::Billing {
            sent_at,
            responded_at,
            status,
        }) => match eligibility(&sent_at, responded_at.as_deref(), &status) {
            Ok(code) => println!("{code}"),
            Err(e) => eprintln!("Error calculating eligibility: {}", e),
        },
        Some(Commands::Config { file }) => {
            let file = file.or_else(|| std::env::var("CAREPLAN_CONFIG_FILE").ok().map(PathBuf::from));
            match resolve_config(file, |key| std::env::var(key).ok()) {
                Ok(summary) => print!("{summary}"),
                Err(e) => eprintln!("Invalid configuration: {}", e),
            }
        }
        None => {
            println!("Use 'careplan --help' for commands");
        }
    }

    Ok(())
}

/// One line per allowed move, `from --transition--> to`.
fn transition_table() -> String {
    let mut out = String::new();
    for from in CarePlanStatus::ALL {
        for transition in Transition::ALL {
            if let Ok(to) = from.transition(transition) {
                out.push_str(&format!("{:<22} --{}--> {to}\n", from.as_str(), transition.name()));
            }
        }
    }
    out
}

fn route(
    mode: &str,
    language: &str,
    skip: bool,
    justification: Option<String>,
    exempt: Option<&str>,
) -> CarePlanResult<String> {
    let mode: InterpreterReviewMode = mode.parse()?;
    let language = LanguageCode::new(language)?;
    let exempt = match exempt {
        Some(list) => list
            .split(',')
            .filter(|l| !l.trim().is_empty())
            .map(LanguageCode::new)
            .collect::<Result<BTreeSet<_>, _>>()?,
        None => CoreConfig::default().review_exempt_languages().clone(),
    };

    let request = ApprovalRequest {
        skip_interpreter_review: Some(skip),
        override_justification: justification,
    };
    let decision = ReviewPolicy::new(exempt).route(mode, &language, &request)?;
    let target = match decision.route {
        ReviewRoute::Approve => CarePlanStatus::Approved,
        ReviewRoute::InterpreterReview => CarePlanStatus::InterpreterReview,
    };
    Ok(format!("{target} ({})", decision.reason))
}

fn parse_instant(value: &str) -> CarePlanResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            careplan_core::CarePlanError::Validation(format!("invalid timestamp '{value}': {e}"))
        })
}

fn eligibility(
    sent_at: &str,
    responded_at: Option<&str>,
    status: &str,
) -> CarePlanResult<BillingEligibility> {
    let status: CarePlanStatus = status.parse()?;
    let sent_at = parse_instant(sent_at)?;
    let responded_at = responded_at.map(parse_instant).transpose()?;
    Ok(billing::classify(status, Some(sent_at), responded_at))
}

fn resolve_config(
    file: Option<PathBuf>,
    lookup: impl Fn(&str) -> Option<String>,
) -> CarePlanResult<String> {
    let settings = match file {
        Some(path) => ConfigSettings::from_file(&path)?,
        None => ConfigSettings::default(),
    };
    let cfg = CoreConfig::new(settings.apply_env(lookup)?)?;

    let languages: Vec<String> = cfg
        .review_exempt_languages()
        .iter()
        .map(|l| l.to_string())
        .collect();
    let offsets: Vec<String> = cfg
        .check_in_offsets()
        .iter()
        .map(|d| d.num_days().to_string())
        .collect();
    let lockout = cfg.token_lockout();

    Ok(format!(
        "token_ttl_days: {}\nreview_exempt_languages: {}\ncompletion_policy: {}\ncheck_in_offsets_days: {}\nportal_link: {}\ntoken_lockout: {} failures in {} min, locked {} min\n",
        cfg.token_ttl().num_days(),
        languages.join(","),
        cfg.completion_policy(),
        offsets.join(","),
        cfg.portal_link("<token>"),
        lockout.max_failures,
        lockout.window.num_minutes(),
        lockout.lockout.num_minutes(),
    ))
}
