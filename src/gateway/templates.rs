//! Placeholder substitution for served pages
//!
//! `${name}` markers in the page source are replaced with runtime values
//! (stream links, MIME type). Unknown markers are left in place.

/// Player page served at the root path
pub const PLAYER_PAGE: &str = r#"<!DOCTYPE html>
<html>
<body>
<h3>Live broadcast stream</h3>
<hr>
<p>
Link: <b><a href="${video.link}">${video.link}</a></b><br>
WebSocket: <b>${wsvideo.link}</b><br>
Playlist: <b><a href="${playlist.link}">${playlist.link}</a></b><br>
Mime: ${video.mime}
</p>
<video width="512" height="384" controls>
<source src="${video.link}" type="${video.mime}">
Your browser does not support HTML video.
</video>
</body>
</html>
"#;

/// Replace every `${name}` marker with its value
pub fn substitute(text: &str, vars: &[(&str, &str)]) -> String {
    let mut result = text.to_string();
    for (name, value) in vars {
        result = result.replace(&format!("${{{}}}", name), value);
    }
    result
}
