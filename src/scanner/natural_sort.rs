use std::cmp::Ordering;
use std::path::Path;

/// Compares two strings treating runs of ASCII digits as integers, so
/// `"file2" < "file10" < "file100"`. Non-digit segments compare byte-wise.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.as_bytes();
    let mut b = b.as_bytes();

    loop {
        match (a.first(), b.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) if ca.is_ascii_digit() && cb.is_ascii_digit() => {
                let (na, rest_a) = take_digits(a);
                let (nb, rest_b) = take_digits(b);
                match na.cmp(&nb) {
                    Ordering::Equal => {
                        a = rest_a;
                        b = rest_b;
                    }
                    other => return other,
                }
            }
            (Some(ca), Some(cb)) => match ca.cmp(cb) {
                Ordering::Equal => {
                    a = &a[1..];
                    b = &b[1..];
                }
                other => return other,
            },
        }
    }
}

fn take_digits(bytes: &[u8]) -> (u128, &[u8]) {
    let end = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
    let value: u128 = std::str::from_utf8(&bytes[..end]).unwrap().parse().unwrap_or(u128::MAX);
    (value, &bytes[end..])
}

/// Natural-sort key for a path: compares the parent directory first (so
/// `CD1/...` sorts before `CD2/...`, preserving disc order), then falls
/// back to the filename within the same directory.
pub fn natural_cmp_paths(a: &Path, b: &Path) -> Ordering {
    let a_parent = a.parent().and_then(|p| p.to_str()).unwrap_or_default();
    let b_parent = b.parent().and_then(|p| p.to_str()).unwrap_or_default();

    match natural_cmp(a_parent, b_parent) {
        Ordering::Equal => {
            let an = a.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            let bn = b.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            natural_cmp(an, bn)
        }
        other => other,
    }
}
