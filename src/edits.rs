/// Byte-range replacements against one source string.
///
/// Edits must not overlap. Insertions at the same offset are applied in the
/// order they were added.
#[derive(Debug, Clone, Default)]
pub struct SourceEdits {
    replacements: Vec<(u32, u32, String)>,
}

impl SourceEdits {
    pub fn new() -> Self {
        SourceEdits::default()
    }

    pub fn replace(&mut self, start: u32, end: u32, text: impl Into<String>) {
        self.replacements.push((start, end, text.into()));
    }

    pub fn insert(&mut self, at: u32, text: impl Into<String>) {
        self.replacements.push((at, at, text.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.replacements.len()
    }

    pub fn apply(&self, source: &str) -> String {
        let mut ordered: Vec<&(u32, u32, String)> = self.replacements.iter().collect();
        // Stable: same-offset insertions keep their push order.
        ordered.sort_by_key(|(start, end, _)| (*start, *end));

        let mut out = String::with_capacity(source.len() + 256);
        let mut cursor = 0usize;
        for (start, end, text) in ordered {
            let (start, end) = (*start as usize, *end as usize);
            if start < cursor {
                tracing::debug!(start, end, "skipping overlapping edit");
                continue;
            }
            out.push_str(&source[cursor..start]);
            out.push_str(text);
            cursor = end;
        }
        out.push_str(&source[cursor..]);
        out
    }
}
