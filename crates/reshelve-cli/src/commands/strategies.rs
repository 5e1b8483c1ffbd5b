use reshelve_config::ValidatedProfile;
use reshelve_engine::{Pipeline, STRATEGY_IDS};
use serde_json::json;

use crate::cli::{OutputFormat, StrategiesArgs};
use crate::error::{CliError, CliResult};

pub(crate) fn handle_strategies(
    profile: Option<&ValidatedProfile>,
    args: &StrategiesArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let Some(validated) = profile else {
        if args.properties {
            return Err(CliError::validation(
                "--properties needs a profile (--profile or RESHELVE_PROFILE)",
            ));
        }
        render_ids(STRATEGY_IDS, format);
        return Ok(());
    };

    let pipeline = Pipeline::from_entries(&validated.profile.pipeline);
    if !args.properties {
        render_ids(&pipeline.ids(), format);
        return Ok(());
    }
    let properties = pipeline.to_properties();
    match format {
        OutputFormat::Table => print!("{}", properties.to_text()),
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = properties
                .iter()
                .map(|(key, value)| (key.to_string(), json!(value)))
                .collect();
            println!("{}", serde_json::Value::Object(map));
        }
    }
    Ok(())
}

fn render_ids(ids: &[&str], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            for id in ids {
                println!("{id}");
            }
        }
        OutputFormat::Json => println!("{}", json!(ids)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_without_profile_is_rejected() {
        let args = StrategiesArgs { properties: true };
        let result = handle_strategies(None, &args, OutputFormat::Table);
        assert!(matches!(result, Err(CliError::Validation(_))));
    }

    #[test]
    fn builtin_listing_needs_no_profile() {
        let args = StrategiesArgs::default();
        assert!(handle_strategies(None, &args, OutputFormat::Json).is_ok());
    }
}
