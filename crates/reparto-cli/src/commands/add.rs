use reparto_core::models::{LocalWrite, ResourceKind};
use reparto_core::sync::SubmitOutcome;

use crate::commands::common::{parse_json_object, Engine};
use crate::error::CliError;
use crate::OpKind;

pub async fn run_add(
    engine: &Engine,
    resource: &str,
    record_id: &str,
    op: OpKind,
    payload: Option<&str>,
    base: Option<&str>,
) -> Result<(), CliError> {
    let resource: ResourceKind = resource
        .parse()
        .map_err(|_| CliError::UnknownResource(resource.to_string()))?;
    let payload = payload.map(parse_json_object).transpose()?.unwrap_or_default();
    let base = base.map(parse_json_object).transpose()?;

    let write = match op {
        OpKind::Create => LocalWrite::create(resource, record_id, payload),
        OpKind::Update => {
            LocalWrite::update(resource, record_id, payload, base.ok_or(CliError::MissingBaseSnapshot)?)
        }
        OpKind::Delete => LocalWrite::delete(resource, record_id, base),
    };

    match engine.submit(write).await? {
        SubmitOutcome::Applied => println!("Applied directly to remote"),
        SubmitOutcome::Queued(op) => println!("{}", op.id),
    }
    Ok(())
}
