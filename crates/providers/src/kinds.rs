use common::{ArtistType, ReleaseType};
use tracing::warn;

const ARTIST_TYPE_KEYWORDS: &[(&str, ArtistType)] = &[
    ("person", ArtistType::Person),
    ("individual", ArtistType::Person),
    ("solo", ArtistType::Person),
    ("singer", ArtistType::Person),
    ("musician", ArtistType::Person),
    ("group", ArtistType::Group),
    ("band", ArtistType::Group),
    ("duo", ArtistType::Group),
    ("trio", ArtistType::Group),
    ("quartet", ArtistType::Group),
    ("ensemble", ArtistType::Group),
    ("orchestra", ArtistType::Orchestra),
    ("philharmonic", ArtistType::Orchestra),
    ("symphony", ArtistType::Orchestra),
    ("choir", ArtistType::Choir),
    ("chorus", ArtistType::Choir),
    ("chorale", ArtistType::Choir),
    ("character", ArtistType::Character),
    ("other", ArtistType::Other),
];

const RELEASE_TYPE_KEYWORDS: &[(&str, ReleaseType)] = &[
    ("album", ReleaseType::Album),
    ("lp", ReleaseType::Album),
    ("master", ReleaseType::Album),
    ("single", ReleaseType::Single),
    ("ep", ReleaseType::Ep),
    ("compilation", ReleaseType::Compilation),
    ("anthology", ReleaseType::Compilation),
    ("live", ReleaseType::Live),
    ("soundtrack", ReleaseType::Soundtrack),
    ("ost", ReleaseType::Soundtrack),
    ("broadcast", ReleaseType::Broadcast),
    ("other", ReleaseType::Other),
];

/// Maps provider free text ("Group", "Band", "Person") onto [`ArtistType`].
/// Unknown text becomes `Other` and is logged.
pub fn canonical_artist_type(raw: &str) -> ArtistType {
    match lookup(raw, ARTIST_TYPE_KEYWORDS) {
        Some(kind) => kind,
        None => {
            warn!("Unrecognized artist type '{}'; using other", raw.trim());
            ArtistType::Other
        }
    }
}

pub fn canonical_release_type(raw: &str) -> ReleaseType {
    match lookup(raw, RELEASE_TYPE_KEYWORDS) {
        Some(kind) => kind,
        None => {
            warn!("Unrecognized release type '{}'; using other", raw.trim());
            ReleaseType::Other
        }
    }
}

fn lookup<T: Copy>(raw: &str, table: &[(&str, T)]) -> Option<T> {
    let lowered = raw.trim().to_lowercase();
    if let Some((_, kind)) = table.iter().find(|(keyword, _)| *keyword == lowered) {
        return Some(*kind);
    }
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .find_map(|token| {
            table
                .iter()
                .find(|(keyword, _)| *keyword == token)
                .map(|(_, kind)| *kind)
        })
}
