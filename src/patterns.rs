// Vanity-address patterns: generation and glob matching.

use rand::Rng;

/// Bitcoin base58 alphabet; characters outside it can never appear in an address.
pub const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// `T` + `prefix_len - 1` random chars + `*` + `suffix_len` random chars.
pub fn generate_pattern<R: Rng + ?Sized>(rng: &mut R, prefix_len: usize, suffix_len: usize) -> String {
    let mut pattern = String::with_capacity(prefix_len + suffix_len + 1);
    pattern.push('T');
    for _ in 1..prefix_len.max(1) {
        pattern.push(random_char(rng));
    }
    pattern.push('*');
    for _ in 0..suffix_len {
        pattern.push(random_char(rng));
    }
    pattern
}

pub fn generate_patterns(count: usize, prefix_len: usize, suffix_len: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| generate_pattern(&mut rng, prefix_len, suffix_len))
        .collect()
}

fn random_char<R: Rng + ?Sized>(rng: &mut R) -> char {
    BASE58_ALPHABET[rng.gen_range(0..BASE58_ALPHABET.len())] as char
}

/// Glob match where `*` spans any run of characters and `?` exactly one.
pub fn glob_matches(pattern: &str, candidate: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let c: Vec<char> = candidate.chars().collect();
    let (mut pi, mut ci) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while ci < c.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == c[ci]) {
            pi += 1;
            ci += 1;
        } else if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ci));
            pi += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ci = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// First pattern in `patterns` that `address` satisfies.
pub fn find_matching<'a>(patterns: &'a [String], address: &str) -> Option<&'a str> {
    patterns
        .iter()
        .find(|p| glob_matches(p, address))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn generated_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let pattern = generate_pattern(&mut rng, 3, 4);
        assert_eq!(pattern.len(), 8);
        assert!(pattern.starts_with('T'));
        assert_eq!(pattern.chars().nth(3), Some('*'));
        assert!(pattern
            .chars()
            .filter(|c| *c != '*')
            .all(|c| BASE58_ALPHABET.contains(&(c as u8))));
        assert_eq!(generate_patterns(5, 3, 4).len(), 5);
    }

    #[test]
    fn glob_semantics() {
        let addr = "TDqSquXBgUCLYvYC4XZgrprLK589dkhSCf";
        assert!(glob_matches("TDq*hSCf", addr));
        assert!(glob_matches("T??*????", addr));
        assert!(glob_matches("*", addr));
        assert!(!glob_matches("TDq*hSCx", addr));
        assert!(!glob_matches("TDq", addr));
        assert!(glob_matches("T*S*f", addr));
    }

    #[test]
    fn finds_first_matching_pattern() {
        let patterns = vec!["TAA*1111".to_string(), "TDq*hSCf".to_string()];
        assert_eq!(
            find_matching(&patterns, "TDqSquXBgUCLYvYC4XZgrprLK589dkhSCf"),
            Some("TDq*hSCf")
        );
        assert_eq!(find_matching(&patterns, "TZZZ"), None);
    }
}
