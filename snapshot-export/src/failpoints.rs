use fail::fail_point;

use crate::error::{ErrorKind, ExportResult};

/// Fires after a page has been published and before its checkpoint is written.
pub const EXPORT_TABLE_BEFORE_CHECKPOINT_FP: &str = "export_table.before_checkpoint";

/// Evaluates the failpoint `name`, returning an injected error when it is configured to fail.
pub fn export_fail_point(name: &str) -> ExportResult<()> {
    fail_point!(name, |_| {
        Err(crate::export_error!(
            ErrorKind::InjectedFailure,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        ))
    });

    Ok(())
}
