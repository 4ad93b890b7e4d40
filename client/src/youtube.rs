/// Check if a URL is a YouTube URL
pub fn is_youtube_url(url: &str) -> bool {
    url.contains("youtube.com/watch")
        || url.contains("youtu.be/")
        || url.contains("youtube.com/shorts/")
        || url.contains("youtube.com/live/")
}

/// Extract video ID from a YouTube URL
pub fn extract_video_id(url: &str) -> Option<String> {
    // Handle youtu.be/VIDEO_ID
    if url.contains("youtu.be/") {
        return url
            .split("youtu.be/")
            .nth(1)
            .map(|s| s.split(&['?', '&', '/'][..]).next().unwrap_or(s).to_string());
    }

    // Handle youtube.com/watch?v=VIDEO_ID
    if url.contains("youtube.com/watch") {
        if let Some(query) = url.split('?').nth(1) {
            for param in query.split('&') {
                if let Some(id) = param.strip_prefix("v=") {
                    return Some(id.to_string());
                }
            }
        }
    }

    // Handle youtube.com/shorts/VIDEO_ID and youtube.com/live/VIDEO_ID
    for marker in ["youtube.com/shorts/", "youtube.com/live/"] {
        if url.contains(marker) {
            return url
                .split(marker)
                .nth(1)
                .map(|s| s.split(&['?', '&', '/'][..]).next().unwrap_or(s).to_string());
        }
    }

    None
}
