use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use common::{sanitize_path_component, Artist, Release, Track};
use tracing::warn;
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "m4a", "ogg", "opus", "wav"];

const COVERS: &[&str] = &[
    "cover.jpg",
    "cover.jpeg",
    "cover.png",
    "folder.jpg",
    "folder.jpeg",
    "folder.png",
    "front.jpg",
    "front.jpeg",
    "front.png",
    "album.jpg",
    "album.jpeg",
    "album.png",
];

const DISC_KEYWORDS: &[&str] = &[
    "cd", "disc", "disk", "dvd", "medium", "media", "format", "vol", "volume", "part", "side",
    "lp",
];

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Release folder candidates under `root`: leaf directories holding audio,
/// with disc sub-folders folded into their parent.
pub fn collect_release_dirs(root: &Path) -> Vec<PathBuf> {
    let mut dirs_with_audio = HashSet::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if is_audio_file(entry.path()) {
            if let Some(parent) = entry.path().parent() {
                dirs_with_audio.insert(parent.to_path_buf());
            }
        }
    }

    let mut has_descendant_audio = HashSet::new();
    for dir in &dirs_with_audio {
        let mut ancestor = dir.parent();
        while let Some(current) = ancestor {
            if !current.starts_with(root) {
                break;
            }
            has_descendant_audio.insert(current.to_path_buf());
            if current == root {
                break;
            }
            ancestor = current.parent();
        }
    }

    let mut release_dirs: HashSet<PathBuf> = dirs_with_audio
        .iter()
        .filter(|dir| !has_descendant_audio.contains(*dir))
        .cloned()
        .collect();

    let mut parent_to_children: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();
    for dir in &release_dirs {
        if let Some(parent) = dir.parent() {
            if parent == root {
                continue;
            }
            parent_to_children
                .entry(parent.to_path_buf())
                .or_default()
                .push(dir.clone());
        }
    }

    for (parent, children) in parent_to_children {
        if dirs_with_audio.contains(&parent) {
            continue;
        }
        let all_discs = children.iter().all(|child| {
            child
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| parse_disc_number(name).is_some())
                .unwrap_or(false)
        });
        if !all_discs {
            continue;
        }
        for child in children {
            release_dirs.remove(&child);
        }
        release_dirs.insert(parent);
    }

    let mut release_dirs: Vec<PathBuf> = release_dirs.into_iter().collect();
    release_dirs.sort();
    release_dirs
}

/// Every audio file under `dir`, recursively, in path order.
pub fn audio_files_in_dir(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if entry.file_type().is_file() && is_audio_file(path) {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    files
}

/// Splits a trailing `(YYYY)` or `[YYYY]` off a folder name.
pub fn split_title_year(input: &str) -> (String, Option<i32>) {
    let trimmed = input.trim();
    if let Some((title, year)) = split_year_suffix(trimmed, '(', ')') {
        return (title.to_string(), Some(year));
    }
    if let Some((title, year)) = split_year_suffix(trimmed, '[', ']') {
        return (title.to_string(), Some(year));
    }
    (trimmed.to_string(), None)
}

fn split_year_suffix(input: &str, open: char, close: char) -> Option<(&str, i32)> {
    let trimmed = input.trim_end();
    if !trimmed.ends_with(close) {
        return None;
    }
    let open_idx = trimmed.rfind(open)?;
    let year_str = trimmed
        .get(open_idx + open.len_utf8()..trimmed.len() - close.len_utf8())?
        .trim();
    if year_str.len() != 4 || !year_str.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let year = year_str.parse::<i32>().ok()?;
    let title = trimmed[..open_idx].trim_end();
    if title.is_empty() {
        return None;
    }
    Some((title, year))
}

pub fn find_folder_cover(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut found: Vec<(usize, PathBuf)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path
            .file_name()
            .map(|s| s.to_string_lossy().to_ascii_lowercase())
        else {
            continue;
        };
        if let Some(rank) = COVERS.iter().position(|cover| *cover == name) {
            found.push((rank, path));
        }
    }
    found.sort();
    found.into_iter().next().map(|(_, path)| path)
}

pub fn disc_number_from_path(file: &Path, release_dir: &Path) -> Option<u16> {
    if !file.starts_with(release_dir) {
        return None;
    }
    let mut current = file.parent()?;
    loop {
        if current == release_dir {
            break;
        }
        if let Some(name) = current.file_name().and_then(|s| s.to_str()) {
            if let Some(num) = parse_disc_number(name) {
                return Some(num);
            }
        }
        current = current.parent()?;
    }
    None
}

pub(crate) fn parse_disc_number(name: &str) -> Option<u16> {
    let cleaned = normalize_disc_name(name);
    if cleaned.is_empty() {
        return None;
    }

    for prefix in DISC_KEYWORDS {
        if let Some(rest) = cleaned.strip_prefix(prefix) {
            if let Some(num) = parse_number_token(rest.trim()) {
                return Some(num);
            }
        }
    }

    let tokens: Vec<&str> = cleaned.split_whitespace().collect();
    if tokens.len() < 2 {
        return None;
    }

    let last = tokens[tokens.len() - 1];
    let num = parse_number_token(last)?;
    if tokens[..tokens.len() - 1]
        .iter()
        .any(|token| DISC_KEYWORDS.contains(token))
    {
        return Some(num);
    }

    None
}

fn normalize_disc_name(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    for ch in name.chars() {
        let ch = ch.to_ascii_lowercase();
        if ch == '_' || ch == '-' || ch == '.' {
            cleaned.push(' ');
        } else {
            cleaned.push(ch);
        }
    }
    cleaned.trim().to_string()
}

fn parse_number_token(token: &str) -> Option<u16> {
    if token.is_empty() {
        return None;
    }
    if token.chars().all(|c| c.is_ascii_digit()) {
        return token.parse::<u16>().ok();
    }
    if token
        .chars()
        .all(|ch| matches!(ch, 'i' | 'v' | 'x' | 'l' | 'c' | 'd' | 'm'))
    {
        return roman_to_u16(token);
    }
    None
}

fn roman_to_u16(input: &str) -> Option<u16> {
    let mut total = 0u16;
    let mut prev = 0u16;
    for ch in input.chars().rev() {
        let value = match ch {
            'i' => 1,
            'v' => 5,
            'x' => 10,
            'l' => 50,
            'c' => 100,
            'd' => 500,
            'm' => 1000,
            _ => return None,
        };
        if value < prev {
            total = total.saturating_sub(value);
        } else {
            total = total.saturating_add(value);
            prev = value;
        }
    }
    if total == 0 {
        None
    } else {
        Some(total)
    }
}

/// Leading track number of names like `03 Title.mp3`, `3-04 Title.flac` or
/// `07. Title.ogg`. For `D-NN` names the track part is returned.
pub fn track_number_from_file_name(name: &str) -> Option<u16> {
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let rest = &name[digits.len()..];
    if let Some(after_dash) = rest.strip_prefix('-') {
        let track: String = after_dash
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if !track.is_empty() {
            return track.parse().ok().filter(|n| *n > 0);
        }
    }
    digits.parse().ok().filter(|n| *n > 0)
}

pub fn artist_folder_name(artist: &Artist) -> String {
    sanitize_path_component(&artist.name)
}

pub fn release_folder_name(release: &Release) -> String {
    match release.year() {
        Some(year) => sanitize_path_component(&format!("{} ({:04})", release.title, year)),
        None => sanitize_path_component(&release.title),
    }
}

/// `artist/release` folder relative to the library root.
pub fn release_relpath(artist: &Artist, release: &Release) -> String {
    format!("{}/{}", artist_folder_name(artist), release_folder_name(release))
}

/// `NN Title.ext`, or `D-NN Title.ext` when the release spans several media.
pub fn track_file_name(track: &Track, media_number: u16, multi_media: bool, ext: &str) -> String {
    let title = if track.title.trim().is_empty() {
        "Track".to_string()
    } else {
        track.title.clone()
    };
    let stem = if multi_media {
        format!("{}-{:02} {}", media_number, track.track_number, title)
    } else {
        format!("{:02} {}", track.track_number, title)
    };
    let stem = sanitize_path_component(&stem);
    if ext.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, ext.to_ascii_lowercase())
    }
}

/// Moves a file, falling back to copy and remove when a rename is not
/// possible (for example across devices).
pub fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!("Rename {:?} -> {:?} failed ({}); copying", from, to, err);
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Removes empty directories under `dir` (deepest first), then `dir` itself
/// and its ancestors while they are empty, never touching `stop_at`.
pub fn remove_empty_dirs(dir: &Path, stop_at: &Path) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    if !dir.is_dir() || !dir.starts_with(stop_at) {
        return removed;
    }
    let mut nested: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect();
    nested.sort_by_key(|path| std::cmp::Reverse(path.components().count()));
    for path in nested {
        if is_empty_dir(&path) && fs::remove_dir(&path).is_ok() {
            removed.push(path);
        }
    }

    let mut current = Some(dir.to_path_buf());
    while let Some(path) = current {
        if path == stop_at || !path.starts_with(stop_at) || !is_empty_dir(&path) {
            break;
        }
        if let Err(err) = fs::remove_dir(&path) {
            warn!("Failed to remove empty folder {:?}: {}", path, err);
            break;
        }
        current = path.parent().map(Path::to_path_buf);
        removed.push(path);
    }
    removed
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use common::{Artist, Release, Track};

    use super::{
        collect_release_dirs, disc_number_from_path, find_folder_cover, parse_disc_number,
        release_folder_name, release_relpath, remove_empty_dirs, split_title_year,
        track_file_name, track_number_from_file_name,
    };

    #[test]
    fn splits_year_suffixes() {
        assert_eq!(split_title_year("Kid A (2000)"), ("Kid A".to_string(), Some(2000)));
        assert_eq!(split_title_year("Amnesiac [2001]"), ("Amnesiac".to_string(), Some(2001)));
        assert_eq!(split_title_year("(2000)"), ("(2000)".to_string(), None));
        assert_eq!(split_title_year("OK Computer"), ("OK Computer".to_string(), None));
    }

    #[test]
    fn parses_disc_folder_names() {
        assert_eq!(parse_disc_number("CD1"), Some(1));
        assert_eq!(parse_disc_number("Disc 2"), Some(2));
        assert_eq!(parse_disc_number("disk_II"), Some(2));
        assert_eq!(parse_disc_number("Bonus"), None);
    }

    #[test]
    fn parses_track_numbers_from_names() {
        assert_eq!(track_number_from_file_name("03 Title.mp3"), Some(3));
        assert_eq!(track_number_from_file_name("2-11 Title.flac"), Some(11));
        assert_eq!(track_number_from_file_name("07. Title.ogg"), Some(7));
        assert_eq!(track_number_from_file_name("Title.mp3"), None);
        assert_eq!(track_number_from_file_name("00 Intro.mp3"), None);
    }

    #[test]
    fn derives_folder_and_file_names() {
        let artist = Artist::new("AC/DC");
        let mut release = Release::new(1, "Back in Black");
        release.release_date = common::parse_partial_date("1980-07-25");
        assert_eq!(release_folder_name(&release), "Back in Black (1980)");
        assert_eq!(release_relpath(&artist, &release), "AC_DC/Back in Black (1980)");

        let mut track = Track::new(1, 4);
        track.title = "Hells Bells".to_string();
        assert_eq!(track_file_name(&track, 1, false, "MP3"), "04 Hells Bells.mp3");
        assert_eq!(track_file_name(&track, 2, true, "mp3"), "2-04 Hells Bells.mp3");
    }

    #[test]
    fn collects_leaf_and_disc_folders() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let single = root.join("Artist").join("Single");
        let double = root.join("Artist").join("Double");
        fs::create_dir_all(&single).unwrap();
        fs::create_dir_all(double.join("CD1")).unwrap();
        fs::create_dir_all(double.join("CD2")).unwrap();
        fs::write(single.join("01 A.mp3"), b"x").unwrap();
        fs::write(single.join("notes.txt"), b"x").unwrap();
        fs::write(double.join("CD1").join("01 A.flac"), b"x").unwrap();
        fs::write(double.join("CD2").join("01 B.flac"), b"x").unwrap();

        let dirs = collect_release_dirs(root);
        assert_eq!(dirs, vec![double.clone(), single]);
        assert_eq!(
            disc_number_from_path(&double.join("CD2").join("01 B.flac"), &double),
            Some(2)
        );
    }

    #[test]
    fn finds_preferred_cover() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Folder.jpg"), b"x").unwrap();
        fs::write(dir.path().join("cover.png"), b"x").unwrap();
        let cover = find_folder_cover(dir.path()).unwrap();
        assert_eq!(cover.file_name().unwrap(), "cover.png");
    }

    #[test]
    fn removes_empty_tree_up_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let release = root.join("Artist").join("Release");
        fs::create_dir_all(release.join("CD1")).unwrap();
        fs::create_dir_all(root.join("Other")).unwrap();
        fs::write(root.join("Other").join("keep.mp3"), b"x").unwrap();

        let removed = remove_empty_dirs(&release, root);
        assert_eq!(removed.len(), 3);
        assert!(!root.join("Artist").exists());
        assert!(root.join("Other").exists());
        assert!(root.exists());
    }
}
