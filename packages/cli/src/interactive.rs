//! Menu-driven front end.
//!
//! Prompts for any data location not given on the command line, then
//! lets the user run analyses against one session until they quit.

use std::error::Error;
use std::path::PathBuf;

use dialoguer::{Confirm, Input, Select};
use health_access_cli_utils::MultiProgress;

use crate::DataArgs;
use crate::commands::{self, Inputs};

/// Actions offered by the menu.
enum Action {
    Analyze,
    ServiceAreas,
    Suitability,
    RemoteSuitability,
    TravelTime,
    Quit,
}

impl Action {
    const ALL: &[Self] = &[
        Self::Analyze,
        Self::ServiceAreas,
        Self::Suitability,
        Self::RemoteSuitability,
        Self::TravelTime,
        Self::Quit,
    ];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::Analyze => "Analyze needs (coverage gaps + population density)",
            Self::ServiceAreas => "Show service areas and ward coverage",
            Self::Suitability => "Find sites for new facilities",
            Self::RemoteSuitability => "Find sites for new facilities (GIS server)",
            Self::TravelTime => "Travel-time coverage (GIS server)",
            Self::Quit => "Quit",
        }
    }
}

fn prompt_location(prompt: &str, given: Option<&String>) -> Result<String, Box<dyn Error>> {
    if let Some(location) = given {
        return Ok(location.clone());
    }
    Ok(Input::<String>::new().with_prompt(prompt).interact_text()?)
}

/// Runs the menu loop.
///
/// # Errors
///
/// Returns an error if a prompt fails or the data cannot be loaded.
/// Failures of individual analyses are logged and the menu continues.
pub async fn run(multi: &MultiProgress, args: &DataArgs) -> Result<(), Box<dyn Error>> {
    println!("Kisumu Health Access");
    println!();

    let facilities = prompt_location("Facilities GeoJSON (path or URL)", args.facilities.as_ref())?;
    let wards = prompt_location("Wards GeoJSON (path or URL)", args.wards.as_ref())?;
    let boundary = match &args.boundary {
        Some(boundary) => Some(boundary.clone()),
        None => {
            let entered: String = Input::new()
                .with_prompt("County boundary GeoJSON (optional, Enter to skip)")
                .allow_empty(true)
                .interact_text()?;
            (!entered.trim().is_empty()).then_some(entered)
        }
    };

    let session = commands::open_session(&Inputs {
        facilities,
        wards,
        boundary,
        config: args.config.clone(),
        offline: args.offline,
    })
    .await?;

    let labels: Vec<&str> = Action::ALL.iter().map(Action::label).collect();
    loop {
        let idx = Select::new()
            .with_prompt("What would you like to do?")
            .items(&labels)
            .default(0)
            .interact()?;

        let outcome = match Action::ALL[idx] {
            Action::Analyze => commands::analyze(&session, multi).await,
            Action::ServiceAreas => commands::service_areas(&session).await,
            Action::Suitability => commands::suitability(&session, multi, false).await,
            Action::RemoteSuitability => commands::suitability(&session, multi, true).await,
            Action::TravelTime => commands::travel_time(&session).await,
            Action::Quit => return Ok(()),
        };

        let value = match outcome {
            Ok(value) => value,
            Err(e) => {
                log::error!("{e}");
                continue;
            }
        };

        let output = if Confirm::new()
            .with_prompt("Save the result to a file?")
            .default(false)
            .interact()?
        {
            let path: String = Input::new().with_prompt("Output path").interact_text()?;
            Some(PathBuf::from(path))
        } else {
            None
        };
        commands::emit(&value, output.as_deref())?;
    }
}
