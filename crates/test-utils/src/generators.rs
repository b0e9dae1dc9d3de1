//! Generators for test cases in the generator's ammo format.

/// A `GET` payload for `path` against `host`.
pub fn get_payload(host: &str, path: &str) -> String {
    format!("GET {} HTTP/1.1\r\nHost: {}\r\n\r\n", path, host)
}

/// Encodes one ammo record: `<len> <marker>\n<payload>\n`.
pub fn ammo_record(marker: &str, payload: &str) -> String {
    format!("{} {}\n{}\n", payload.len(), marker, payload)
}

/// Ammo with `count` GET requests to `/item/<i>`, markers `case_<i>`.
///
/// # Example
///
/// ```
/// use test_utils::numbered_ammo;
///
/// let ammo = numbered_ammo(2, "localhost");
/// assert!(ammo.starts_with("41 case_0\nGET /item/0 HTTP/1.1\r\n"));
/// ```
pub fn numbered_ammo(count: usize, host: &str) -> String {
    (0..count)
        .map(|i| ammo_record(&format!("case_{}", i), &get_payload(host, &format!("/item/{}", i))))
        .collect()
}

/// Counts how many fire times fall in each whole second.
pub fn per_second_counts(fire_times: &[f64]) -> Vec<u64> {
    if fire_times.is_empty() {
        return Vec::new();
    }
    let last = fire_times.iter().cloned().fold(0.0, f64::max);
    let mut counts = vec![0u64; last.floor() as usize + 1];
    for t in fire_times {
        counts[t.floor() as usize] += 1;
    }
    counts
}
