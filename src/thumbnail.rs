// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

/// Thumbnail path repair for cached instance metadata.
///
/// Historic sweeps occasionally prefixed a thumbnail path onto itself,
/// producing rewrite loops such as `/img/img/foo.png` that grew on every
/// refresh. The sanitizer runs on every sweep against previously sanitized
/// values, so it must be idempotent: repairing an already repaired value is
/// a no-op.
use std::path::{Component, Path};

/// Sentinel served when an instance has no usable thumbnail.
pub const PLACEHOLDER_THUMBNAIL: &str = "/img/thumbnail-missing.png";

/// Validates or repairs a thumbnail reference.
///
/// Rules, applied in order:
///
/// 1. Empty input becomes the placeholder sentinel.
/// 2. The sentinel itself passes through untouched.
/// 3. Any reference containing a repeated adjacent directory segment (the
///    rewrite-loop signature) becomes the sentinel.
/// 4. A local reference (leading `/`) containing a parent-directory segment
///    becomes the sentinel; the existence check below must never look
///    outside `assets_root`.
/// 5. A local reference whose asset is missing under `assets_root` becomes
///    the sentinel; a present asset passes through.
/// 6. Anything else (remote absolute URL) passes through untouched.
///
/// # Parameters
///
/// * `raw` - Thumbnail reference as stored or as reported by a probe.
/// * `assets_root` - Directory holding locally mirrored thumbnail assets.
///
/// # Examples
///
/// ```
/// use std::path::Path;
///
/// use fedidir::{PLACEHOLDER_THUMBNAIL, sanitize_thumbnail};
///
/// let assets = Path::new("/var/empty");
/// assert_eq!(sanitize_thumbnail("", assets), PLACEHOLDER_THUMBNAIL);
/// assert_eq!(sanitize_thumbnail("/img/img/a.png", assets), PLACEHOLDER_THUMBNAIL);
/// assert_eq!(
///     sanitize_thumbnail("https://cdn.example.org/a.png", assets),
///     "https://cdn.example.org/a.png"
/// );
/// ```
pub fn sanitize_thumbnail(raw: &str, assets_root: &Path) -> String {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return PLACEHOLDER_THUMBNAIL.to_owned();
    }

    if trimmed == PLACEHOLDER_THUMBNAIL {
        return PLACEHOLDER_THUMBNAIL.to_owned();
    }

    if has_repeated_segment(trimmed) {
        return PLACEHOLDER_THUMBNAIL.to_owned();
    }

    if let Some(relative) = trimmed.strip_prefix('/') {
        let escapes_root = Path::new(relative)
            .components()
            .any(|component| matches!(component, Component::ParentDir));
        if escapes_root {
            return PLACEHOLDER_THUMBNAIL.to_owned();
        }
        if assets_root.join(relative).is_file() {
            return trimmed.to_owned();
        }
        return PLACEHOLDER_THUMBNAIL.to_owned();
    }

    trimmed.to_owned()
}

/// Detects the rewrite-loop signature: two identical adjacent path segments.
fn has_repeated_segment(reference: &str) -> bool {
    let mut previous: Option<&str> = None;

    for segment in reference.split('/').filter(|segment| !segment.is_empty()) {
        if previous == Some(segment) {
            return true;
        }
        previous = Some(segment);
    }

    false
}
