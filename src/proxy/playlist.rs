//! Merged playlist rendering.

use crate::models::Channel;

/// Public stream path for a channel, reversibly derived from its title.
pub fn stream_path(title: &str) -> String {
    format!("/stream/{}.mp4", urlencoding::encode(title))
}

/// Recover a channel title from the path segment of a stream URL (without
/// the `.mp4` suffix).
pub fn decode_channel_id(id: &str) -> Option<String> {
    urlencoding::decode(id).ok().map(|s| s.into_owned())
}

/// Render the merged M3U. Every URL points back at this service; the four
/// tvg/group attributes are always emitted, double-quoted, in fixed order,
/// so the output re-parses into the same catalog.
pub fn generate_playlist(channels: &[Channel], base_url: &str) -> String {
    let mut m3u = String::from("#EXTM3U\n");

    for channel in channels {
        m3u.push_str(&format!(
            "#EXTINF:-1 tvg-id=\"{}\" tvg-name=\"{}\" tvg-logo=\"{}\" group-title=\"{}\",{}\n",
            channel.tvg_id, channel.title, channel.logo_url, channel.group_name, channel.title
        ));
        m3u.push_str(base_url);
        m3u.push_str(&stream_path(&channel.title));
        m3u.push('\n');
    }

    m3u
}
