//! Dump | restore process pipe.

use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};

use tracing::{info, warn};

use crate::error::{io_err, spawn_err, ArchiveError};
use crate::plan::TransferPlan;

/// Run `dump | restore` for `plan` and wait for both sides.
///
/// Blocks the calling thread. Fails with [`ArchiveError::ProcessFailed`]
/// when either process exits unsuccessfully.
pub fn transfer_collection(plan: &TransferPlan) -> Result<(), ArchiveError> {
    let (dump_line, restore_line) = plan.describe();
    info!(dump = %dump_line, restore = %restore_line, "starting transfer");

    let mut dump = Command::new(&plan.dump_program)
        .args(plan.dump_args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_err(&plan.dump_program, e))?;

    let Some(archive) = dump.stdout.take() else {
        reap(&mut dump);
        return Err(spawn_err(
            &plan.dump_program,
            std::io::Error::other("dump stdout was not captured"),
        ));
    };

    // the parent keeps no handle on the pipe once restore owns it
    let restore = Command::new(&plan.restore_program)
        .args(plan.restore_args())
        .stdin(Stdio::from(archive))
        .spawn();
    let mut restore = match restore {
        Ok(child) => child,
        Err(e) => {
            reap(&mut dump);
            return Err(spawn_err(&plan.restore_program, e));
        }
    };

    let restore_status = restore_status(restore.wait(), &mut dump, &plan.restore_program)?;
    let dump_status = dump.wait().map_err(|e| io_err(&plan.dump_program, e))?;

    if !dump_status.success() || !restore_status.success() {
        warn!(
            collection = %plan.collection,
            dump = %dump_status,
            restore = %restore_status,
            "transfer failed"
        );
        return Err(ArchiveError::ProcessFailed {
            dump: dump_status,
            restore: restore_status,
        });
    }

    info!(
        from = %plan.source_namespace(),
        to = %plan.target_namespace(),
        "transfer completed"
    );
    Ok(())
}

/// Restore's exit status; if waiting on it failed, the dump goes too.
fn restore_status(
    waited: std::io::Result<ExitStatus>,
    dump: &mut Child,
    restore_program: &Path,
) -> Result<ExitStatus, ArchiveError> {
    waited.map_err(|e| {
        reap(dump);
        io_err(restore_program, e)
    })
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
