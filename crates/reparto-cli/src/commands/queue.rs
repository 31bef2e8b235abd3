use crate::commands::common::{
    find_operation_id, format_operation_lines, operation_to_list_item, Engine, OperationListItem,
};
use crate::error::CliError;

pub async fn run_list(engine: &Engine, as_json: bool) -> Result<(), CliError> {
    let operations = engine.list_queue().await?;

    if as_json {
        let items = operations
            .iter()
            .map(operation_to_list_item)
            .collect::<Vec<OperationListItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_operation_lines(&operations) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_retry(engine: &Engine, id_prefix: &str) -> Result<(), CliError> {
    let operations = engine.list_queue().await?;
    let id = find_operation_id(&operations, id_prefix)?;

    let op = engine.retry_operation(&id).await?;
    println!("Requeued {} (attempt count so far: {})", op.id, op.retry_count);
    Ok(())
}

pub async fn run_cancel(engine: &Engine, id_prefix: &str) -> Result<(), CliError> {
    let operations = engine.list_queue().await?;
    let id = find_operation_id(&operations, id_prefix)?;

    engine.cancel_operation(&id).await?;
    println!("Cancelled {id}");
    Ok(())
}
