//! Channel resolution and release.
//!
//! A channel names a (track, risk) pair under a snap. Each risk points at
//! exactly one revision; releasing repoints risks, resolving follows them.
//! Branches are parsed but never resolved or released.

use std::collections::BTreeSet;

use kebe_core::{parse_channel, ChannelError, ChannelRef};
use kebe_store::{Repository, RowId, SnapEntry, SnapRevision, SnapRisk, SnapTrack};
use serde::Serialize;

use crate::error::{KebeError, Result};

/// Architecture reported for every revision.
pub const ARCHITECTURE: &str = "amd64";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelMapEntry {
    pub architecture: String,
    /// `track/risk`.
    pub channel: String,
    pub revision: i64,
    pub sha3_384: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelMap {
    pub name: String,
    pub channel_map: Vec<ChannelMapEntry>,
    pub tracks: Vec<String>,
}

/// Parse a channel; an unknown risk is an unknown channel of this snap.
fn parse(snap: &SnapEntry, raw: &str) -> Result<ChannelRef> {
    parse_channel(raw).map_err(|e| match e {
        ChannelError::UnknownRisk { channel, .. } => KebeError::ChannelUnknown {
            package: snap.name.clone(),
            channel,
        },
        other => other.into(),
    })
}

async fn lookup_risk<R: Repository + ?Sized>(
    repo: &R,
    snap: &SnapEntry,
    channel: &ChannelRef,
    raw: &str,
) -> Result<SnapRisk> {
    let unknown = || KebeError::ChannelUnknown {
        package: snap.name.clone(),
        channel: raw.to_string(),
    };
    let track = repo
        .track_by_name(snap.id, &channel.track)
        .await?
        .ok_or_else(unknown)?;
    repo.risk_by_track(track.id, channel.risk)
        .await?
        .ok_or_else(unknown)
}

/// Resolve a channel to the revision its risk points at.
pub async fn resolve<R: Repository + ?Sized>(
    repo: &R,
    snap: &SnapEntry,
    channel: &str,
) -> Result<SnapRevision> {
    let parsed = parse(snap, channel)?;
    let risk = lookup_risk(repo, snap, &parsed, channel).await?;
    let revision = repo
        .revision_by_id(risk.revision)
        .await?
        .ok_or(KebeError::RevisionNotFound(risk.revision))?;
    tracing::debug!(snap = %snap.name, channel, revision = revision.id, "resolved channel");
    Ok(revision)
}

/// Parse every channel and find its risk, failing on the first channel the
/// snap does not have.
async fn resolve_risks<R: Repository + ?Sized>(
    repo: &R,
    snap: &SnapEntry,
    channels: &[String],
) -> Result<(Vec<ChannelRef>, Vec<RowId>)> {
    let mut parsed_channels = Vec::with_capacity(channels.len());
    let mut risk_ids = BTreeSet::new();
    for raw in channels {
        let parsed = parse(snap, raw)?;
        let risk = lookup_risk(repo, snap, &parsed, raw).await?;
        risk_ids.insert(risk.id);
        parsed_channels.push(parsed);
    }
    Ok((parsed_channels, risk_ids.into_iter().collect()))
}

/// Check that every channel in `channels` exists on `snap` without
/// changing anything.
pub async fn check_releasable<R: Repository + ?Sized>(
    repo: &R,
    snap: &SnapEntry,
    channels: &[String],
) -> Result<()> {
    resolve_risks(repo, snap, channels).await.map(|_| ())
}

/// Point every channel in `channels` at `revision`.
///
/// All channels are parsed and resolved before anything changes, and the
/// risks are repointed in one transaction: either every channel moves or
/// none does. Tracks and risks are never created here.
pub async fn release<R: Repository + ?Sized>(
    repo: &R,
    snap: &SnapEntry,
    channels: &[String],
    revision: &SnapRevision,
) -> Result<Vec<ChannelRef>> {
    if revision.snap_entry != snap.id {
        return Err(KebeError::InvalidRequest(format!(
            "revision {} does not belong to {}",
            revision.id, snap.name
        )));
    }

    let (released, risk_ids) = resolve_risks(repo, snap, channels).await?;
    repo.set_risk_revisions(&risk_ids, revision.id).await?;

    tracing::info!(
        snap = %snap.name,
        revision = revision.id,
        channels = ?channels,
        "released revision"
    );
    Ok(released)
}

/// Every track and risk of a snap with the revision it points at.
pub async fn channel_map<R: Repository + ?Sized>(repo: &R, snap: &SnapEntry) -> Result<ChannelMap> {
    let tracks: Vec<SnapTrack> = repo.list_tracks(snap.id).await?;

    let mut entries = Vec::new();
    for track in &tracks {
        for risk in repo.list_risks(track.id).await? {
            let revision = repo
                .revision_by_id(risk.revision)
                .await?
                .ok_or(KebeError::RevisionNotFound(risk.revision))?;
            entries.push(ChannelMapEntry {
                architecture: ARCHITECTURE.to_string(),
                channel: format!("{}/{}", track.name, risk.risk),
                revision: revision.id,
                sha3_384: revision.sha3_384,
                size: revision.size,
            });
        }
    }

    Ok(ChannelMap {
        name: snap.name.clone(),
        channel_map: entries,
        tracks: tracks.into_iter().map(|t| t.name).collect(),
    })
}
