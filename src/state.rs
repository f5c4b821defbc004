use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use md5::{Digest, Md5};
use serde_json::Value;
use tracing::{debug, info};

use crate::api::scalr::ScalrClient;
use crate::api::tfc::{TfcClient, TfcWorkspace};
use crate::config::MigrationConfig;
use crate::error::ApiError;
use crate::mapper::enforce_max_version;
use crate::report::{RunReport, WarningKind};

/// A raw state payload prepared for upload.
#[derive(Debug)]
pub struct EncodedState {
    pub serial: u64,
    pub lineage: Option<String>,
    pub md5_hex: String,
    pub encoded: String,
}

/// Serialize, digest and base64 a state document. Returns `None` when the
/// payload has no serial, which means it is not a state file at all.
pub fn encode_state(raw: &Value) -> Option<EncodedState> {
    let serial = raw.get("serial").and_then(Value::as_u64)?;
    let lineage = raw
        .get("lineage")
        .and_then(Value::as_str)
        .map(str::to_string);

    let content = serde_json::to_vec(raw).ok()?;
    let md5_hex = format!("{:x}", Md5::digest(&content));
    let encoded = BASE64.encode(&content);

    Some(EncodedState {
        serial,
        lineage,
        md5_hex,
        encoded,
    })
}

/// Cap the terraform version recorded inside a state payload so the
/// destination accepts it.
fn cap_state_version(raw: &mut Value, subject: &str, report: &RunReport) {
    let current = raw
        .get("terraform_version")
        .and_then(Value::as_str)
        .map(str::to_string);
    if let Some(version) = current {
        let capped = enforce_max_version(&version, subject, report);
        if capped != version {
            raw["terraform_version"] = Value::String(capped);
        }
    }
}

async fn download_and_push(
    tfc: &TfcClient,
    scalr: &ScalrClient,
    scalr_workspace_id: &str,
    download_url: &str,
    subject: &str,
    report: &RunReport,
) -> Result<Option<u64>, ApiError> {
    let mut raw = tfc.download_state(download_url).await?;
    cap_state_version(&mut raw, subject, report);

    let encoded = match encode_state(&raw) {
        Some(encoded) => encoded,
        None => {
            report.warn(
                WarningKind::MissingState,
                Some(subject),
                "downloaded state has no serial; not pushed",
            );
            return Ok(None);
        }
    };

    scalr
        .push_state(
            scalr_workspace_id,
            encoded.serial,
            encoded.lineage.as_deref(),
            &encoded.md5_hex,
            &encoded.encoded,
        )
        .await?;
    Ok(Some(encoded.serial))
}

/// Move a workspace's state into the destination, preserving lineage and
/// serial so the destination timeline is a superset of the source's.
/// Returns the highest serial now present in the destination, or `None`
/// when the workspace has no state to move.
pub async fn transfer_state(
    tfc: &TfcClient,
    scalr: &ScalrClient,
    config: &MigrationConfig,
    source: &TfcWorkspace,
    scalr_workspace_id: &str,
    report: &RunReport,
) -> Result<Option<u64>, ApiError> {
    let workspace_name = source.name();

    let link = match source.current_state_link() {
        Some(link) => link,
        None => {
            report.warn(
                WarningKind::MissingState,
                Some(workspace_name),
                "workspace has no state versions; state migration skipped",
            );
            return Ok(None);
        }
    };

    let current = match tfc.get_state_version(link).await {
        Ok(current) => current,
        Err(err) if err.is_not_found() => {
            report.warn(
                WarningKind::MissingState,
                Some(workspace_name),
                "current state version is gone; state migration skipped",
            );
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    let download_url = match current.attributes.hosted_state_download_url.as_deref() {
        Some(url) => url,
        None => {
            report.warn(
                WarningKind::MissingState,
                Some(workspace_name),
                "state file URL is unavailable; state migration skipped",
            );
            return Ok(None);
        }
    };

    let source_serial = current.attributes.serial;
    let destination_serial = scalr.get_current_state_serial(scalr_workspace_id).await?;

    if let Some(existing) = destination_serial {
        if existing >= source_serial {
            info!(
                "[{}] Destination state serial {} is up-to-date",
                workspace_name, existing
            );
            return Ok(Some(existing));
        }
    }

    if config.migrate_state_history {
        push_history(
            tfc,
            scalr,
            config,
            source,
            scalr_workspace_id,
            source_serial,
            destination_serial,
            report,
        )
        .await?;
    }

    let pushed = download_and_push(
        tfc,
        scalr,
        scalr_workspace_id,
        download_url,
        workspace_name,
        report,
    )
    .await?;
    if let Some(serial) = pushed {
        info!("[{}] Pushed state serial {}", workspace_name, serial);
    }
    Ok(pushed)
}

/// Push every historical version older than the current one, ascending by
/// serial, so the destination history replays in order. Individual
/// version failures degrade to warnings; the current version still wins.
#[allow(clippy::too_many_arguments)]
async fn push_history(
    tfc: &TfcClient,
    scalr: &ScalrClient,
    config: &MigrationConfig,
    source: &TfcWorkspace,
    scalr_workspace_id: &str,
    current_serial: u64,
    destination_serial: Option<u64>,
    report: &RunReport,
) -> Result<(), ApiError> {
    let workspace_name = source.name();
    let mut versions = tfc
        .list_state_versions(&config.tfc_organization, workspace_name)
        .await?;
    versions.sort_by_key(|v| v.attributes.serial);

    let floor = destination_serial;
    for version in versions {
        let serial = version.attributes.serial;
        if serial >= current_serial {
            continue;
        }
        if floor.map_or(false, |f| serial <= f) {
            continue;
        }
        let url = match version.attributes.hosted_state_download_url.as_deref() {
            Some(url) => url,
            None => {
                report.warn(
                    WarningKind::StateHistory,
                    Some(workspace_name),
                    format!("historical serial {} has no download URL; skipped", serial),
                );
                continue;
            }
        };
        match download_and_push(tfc, scalr, scalr_workspace_id, url, workspace_name, report).await {
            Ok(Some(pushed)) => debug!(
                "[{}] Pushed historical state serial {}",
                workspace_name, pushed
            ),
            Ok(None) => {}
            Err(err) => {
                report.warn(
                    WarningKind::StateHistory,
                    Some(workspace_name),
                    format!("historical serial {} failed to push: {}", serial, err),
                );
            }
        }
    }
    Ok(())
}
