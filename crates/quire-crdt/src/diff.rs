//! Character-level text diff.
//!
//! Restoring a snapshot must be expressed as a forward edit on the live
//! sequence, never as a wholesale state swap, so that peers holding causal
//! history for the unchanged characters keep it. The diff trims the common
//! prefix and suffix and runs an LCS over what remains; very large middles
//! fall back to delete-then-insert.

/// Upper bound on LCS table cells before falling back to a plain replace.
const MAX_LCS_CELLS: usize = 4_000_000;

/// One step of an edit script, applied left to right.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Edit {
    /// Keep the next `n` characters.
    Retain(usize),
    /// Remove the next `n` characters.
    Delete(usize),
    /// Insert text at the current position.
    Insert(String),
}

struct Script {
    edits: Vec<Edit>,
}

impl Script {
    fn retain(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        match self.edits.last_mut() {
            Some(Edit::Retain(m)) => *m += n,
            _ => self.edits.push(Edit::Retain(n)),
        }
    }

    fn delete(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        match self.edits.last_mut() {
            Some(Edit::Delete(m)) => *m += n,
            _ => self.edits.push(Edit::Delete(n)),
        }
    }

    fn insert(&mut self, ch: char) {
        match self.edits.last_mut() {
            Some(Edit::Insert(s)) => s.push(ch),
            _ => self.edits.push(Edit::Insert(ch.to_string())),
        }
    }

    fn insert_all(&mut self, chars: &[char]) {
        for &ch in chars {
            self.insert(ch);
        }
    }
}

/// Compute an edit script turning `old` into `new`.
pub fn diff(old: &str, new: &str) -> Vec<Edit> {
    let a: Vec<char> = old.chars().collect();
    let b: Vec<char> = new.chars().collect();

    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let max_suffix = a.len().min(b.len()) - prefix;
    let suffix = a
        .iter()
        .rev()
        .zip(b.iter().rev())
        .take(max_suffix)
        .take_while(|(x, y)| x == y)
        .count();

    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];

    let mut script = Script { edits: Vec::new() };
    script.retain(prefix);

    if a_mid.is_empty() || b_mid.is_empty() || a_mid.len() * b_mid.len() > MAX_LCS_CELLS {
        script.delete(a_mid.len());
        script.insert_all(b_mid);
    } else {
        lcs_script(a_mid, b_mid, &mut script);
    }

    script.retain(suffix);

    // A trailing retain carries no information.
    if matches!(script.edits.last(), Some(Edit::Retain(_))) {
        script.edits.pop();
    }
    script.edits
}

fn lcs_script(a: &[char], b: &[char], script: &mut Script) {
    let (n, m) = (a.len(), b.len());
    let width = m + 1;
    // table[i * width + j] = LCS length of a[i..] and b[j..]
    let mut table = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if a[i] == b[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            script.retain(1);
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            script.delete(1);
            i += 1;
        } else {
            script.insert(b[j]);
            j += 1;
        }
    }
    script.delete(n - i);
    script.insert_all(&b[j..]);
}

/// Apply an edit script to a plain string. Used to check scripts.
pub fn apply(old: &str, edits: &[Edit]) -> String {
    let chars: Vec<char> = old.chars().collect();
    let mut out = String::new();
    let mut pos = 0;
    for edit in edits {
        match edit {
            Edit::Retain(n) => {
                out.extend(&chars[pos..pos + n]);
                pos += n;
            }
            Edit::Delete(n) => pos += n,
            Edit::Insert(s) => out.push_str(s),
        }
    }
    out.extend(&chars[pos..]);
    out
}
