//! Company catalog command handlers: companies, questions, competitors.

use clap::Subcommand;
use uuid::Uuid;

#[derive(Debug, Subcommand)]
pub enum CompanyCommands {
    /// Register a company
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        website: Option<String>,
    },
    /// Add a question to a company's question set
    AddQuestion {
        /// Company public id
        #[arg(long)]
        company: Uuid,
        #[arg(long)]
        text: String,
        /// Store the question without including it in runs
        #[arg(long)]
        inactive: bool,
    },
    /// Track a competitor for a company
    AddCompetitor {
        /// Company public id
        #[arg(long)]
        company: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long)]
        website: Option<String>,
    },
    /// Show a company's active questions and competitors
    Show {
        /// Company public id
        #[arg(long)]
        company: Uuid,
    },
}

pub(crate) async fn load_company(
    pool: &sqlx::PgPool,
    public_id: Uuid,
) -> anyhow::Result<aivis_db::CompanyRow> {
    aivis_db::get_company_by_public_id(pool, public_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("company {public_id} not found"))
}

fn non_blank<'a>(what: &str, value: &'a str) -> anyhow::Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        anyhow::bail!("{what} must not be blank");
    }
    Ok(trimmed)
}

/// Dispatch a `company` subcommand.
///
/// # Errors
///
/// Returns an error for blank input, an unknown company, or a database
/// failure.
pub(crate) async fn run_company_command(
    pool: &sqlx::PgPool,
    command: CompanyCommands,
) -> anyhow::Result<()> {
    match command {
        CompanyCommands::Add { name, website } => {
            let name = non_blank("name", &name)?;
            let company = aivis_db::create_company(pool, name, website.as_deref()).await?;
            println!("company {} created ({})", company.public_id, company.name);
        }
        CompanyCommands::AddQuestion {
            company,
            text,
            inactive,
        } => {
            let text = non_blank("question text", &text)?;
            let company = load_company(pool, company).await?;
            let question = aivis_db::create_question(pool, company.id, text, !inactive).await?;
            println!(
                "question {} added to {} (active: {})",
                question.id, company.name, !inactive
            );
        }
        CompanyCommands::AddCompetitor {
            company,
            name,
            website,
        } => {
            let name = non_blank("competitor name", &name)?;
            let company = load_company(pool, company).await?;
            match aivis_db::insert_competitor_if_absent(
                pool,
                company.id,
                name,
                website.as_deref(),
                false,
            )
            .await?
            {
                Some(row) => println!("competitor '{}' added to {}", row.name, company.name),
                None => println!("competitor '{name}' is already tracked for {}", company.name),
            }
        }
        CompanyCommands::Show { company } => {
            let company = load_company(pool, company).await?;
            let questions = aivis_db::list_active_questions(pool, company.id).await?;
            let competitors = aivis_db::list_competitors(pool, company.id).await?;

            println!("{} ({})", company.name, company.public_id);
            if let Some(website) = &company.website {
                println!("website: {website}");
            }
            println!("\nactive questions ({}):", questions.len());
            for question in &questions {
                println!("  [{}] {}", question.id, question.text);
            }
            println!("\ncompetitors ({}):", competitors.len());
            for competitor in &competitors {
                let origin = if competitor.is_generated {
                    "detected"
                } else {
                    "manual"
                };
                println!("  {} ({origin})", competitor.name);
            }
        }
    }
    Ok(())
}
