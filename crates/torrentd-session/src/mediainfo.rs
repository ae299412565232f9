//! Media-info prefetch: pull just enough leading bytes of an eligible file to
//! extract container metadata, then let the torrent download normally.

use std::path::Path;

use torrentd_config::DaemonSettings;
use torrentd_engine::{EngineTorrentHandle, Priority};

/// Sets up piece-priority prefetch for a newly added torrent, if daemon-wide
/// media-info is enabled and any file qualifies.
///
/// No-op if the torrent's files are not yet known (metadata pending).
pub(crate) fn setup_prefetch(handle: &dyn EngineTorrentHandle, settings: &DaemonSettings) {
    let Some(files) = handle.status().files else {
        return;
    };

    let num_pieces = handle.num_pieces();
    let mut wanted = std::collections::BTreeMap::new();
    let mut piece_prio = Vec::new();

    for file in &files {
        if file.size_bytes < settings.mediainfo_file_min_size {
            continue;
        }
        if !settings.mediainfo_extensions.contains(&extension_lower(&file.path)) {
            continue;
        }

        let mut piece_index = handle.piece_index_at_file(file.index);
        let mut accumulated = 0_u64;
        let mut indices = Vec::new();
        while accumulated < settings.mediainfo_file_wanted_size && piece_index < num_pieces {
            accumulated += handle.piece_size(piece_index);
            indices.push(piece_index);
            piece_index += 1;
        }
        if indices.is_empty() {
            continue;
        }
        piece_prio.extend(indices.iter().copied());
        wanted.insert(file.index, indices);
    }

    if piece_prio.is_empty() {
        return;
    }

    let mut priorities = vec![Priority::DontDownload; num_pieces as usize];
    for index in piece_prio {
        if let Some(slot) = priorities.get_mut(index as usize) {
            *slot = Priority::Top;
        }
    }
    handle.prioritize_pieces(&priorities);

    let mut client_data = handle.client_data();
    client_data.pieces_wanted = Some(wanted);
    client_data.pieces_completed = Some(std::collections::BTreeMap::new());
    client_data.mediainfo_enabled = true;
    handle.set_client_data(client_data);
}

/// Advances the prefetch state machine for one completed piece.
///
/// Returns `true` once every tracked file has resolved and normal piece
/// priorities were restored, signaling the caller to publish a
/// `torrent-mediainfo` event.
pub(crate) async fn on_piece_finished(handle: &dyn EngineTorrentHandle, piece_index: u32) -> bool {
    let mut client_data = handle.client_data();
    if !client_data.mediainfo_enabled {
        return false;
    }
    let Some(mut wanted) = client_data.pieces_wanted.clone() else {
        return false;
    };
    let mut completed = client_data.pieces_completed.clone().unwrap_or_default();

    let status = handle.status();
    let files = status.files.clone().unwrap_or_default();
    let tracked: Vec<(u32, Vec<u32>)> = wanted.iter().map(|(k, v)| (*k, v.clone())).collect();

    for (file_index, pieces) in tracked {
        if !pieces.contains(&piece_index) {
            continue;
        }
        let entry = completed.entry(file_index).or_default();
        if !entry.contains(&piece_index) {
            entry.push(piece_index);
        }

        let mut entry_sorted = entry.clone();
        entry_sorted.sort_unstable();
        let mut pieces_sorted = pieces.clone();
        pieces_sorted.sort_unstable();

        if entry_sorted == pieces_sorted {
            if let Some(file) = files.iter().find(|file| file.index == file_index) {
                let full_path = Path::new(&status.save_path).join(&file.path);
                if let Some(metadata) = extract_mediainfo(&full_path).await {
                    client_data.mediainfo = Some(metadata);
                }
            }
            completed.remove(&file_index);
            wanted.remove(&file_index);
        }
    }

    if completed.values().all(Vec::is_empty) {
        let priorities = vec![Priority::Default; handle.num_pieces() as usize];
        handle.prioritize_pieces(&priorities);
        client_data.mediainfo_enabled = false;
        client_data.mediainfo_enabled_staggered = true;
        client_data.pieces_wanted = None;
        client_data.pieces_completed = None;
        handle.set_client_data(client_data);
        true
    } else {
        client_data.pieces_wanted = Some(wanted);
        client_data.pieces_completed = Some(completed);
        handle.set_client_data(client_data);
        false
    }
}

fn extension_lower(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .map_or_else(String::new, str::to_lowercase)
}

/// Reads and parses container metadata at `path`. A read or parse failure
/// returns `None` and never aborts the surrounding handler.
async fn extract_mediainfo(path: &Path) -> Option<serde_json::Value> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let tagged_file = lofty::read_from_path(&path).ok()?;
        let properties = tagged_file.properties();
        Some(serde_json::json!({
            "duration_secs": properties.duration().as_secs_f64(),
            "overall_bitrate_kbps": properties.overall_bitrate(),
            "audio_bitrate_kbps": properties.audio_bitrate(),
            "sample_rate": properties.sample_rate(),
            "channels": properties.channels(),
        }))
    })
    .await
    .ok()
    .flatten()
}
