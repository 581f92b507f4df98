use crate::common_io::*;
use std::collections::HashMap;

/// Read-only bidirectional term dictionary: `term <-> id`, ids dense in
/// `[0, len)`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    terms: Vec<Box<str>>,
    term_to_id: HashMap<Box<str>, usize>,
}

impl Dictionary {
    /// Build from terms listed in id order
    pub fn from_terms(terms: Vec<Box<str>>) -> anyhow::Result<Self> {
        let mut term_to_id = HashMap::with_capacity(terms.len());
        for (id, term) in terms.iter().enumerate() {
            if term_to_id.insert(term.clone(), id).is_some() {
                return Err(anyhow::anyhow!("duplicated term: {}", term));
            }
        }
        Ok(Dictionary { terms, term_to_id })
    }

    /// Invert a `term -> id` map; every id in `[0, max_id]` must be
    /// taken by exactly one term
    pub fn invert(term_to_id: HashMap<Box<str>, usize>) -> anyhow::Result<Self> {
        let n = term_to_id.values().max().map(|&m| m + 1).unwrap_or(0);
        let mut terms: Vec<Option<Box<str>>> = vec![None; n];
        for (term, &id) in term_to_id.iter() {
            if terms[id].replace(term.clone()).is_some() {
                return Err(anyhow::anyhow!("term id {} is assigned twice", id));
            }
        }
        let terms = terms
            .into_iter()
            .enumerate()
            .map(|(id, t)| t.ok_or(anyhow::anyhow!("term id {} has no term", id)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Dictionary { terms, term_to_id })
    }

    /// Numbered terms `prefix0, prefix1, ...` for data without a vocabulary
    pub fn numbered(prefix: &str, n: usize) -> Self {
        let terms: Vec<Box<str>> = (0..n).map(|i| format!("{}{}", prefix, i).into()).collect();
        let term_to_id = terms.iter().cloned().enumerate().map(|(i, t)| (t, i)).collect();
        Dictionary { terms, term_to_id }
    }

    ///
    /// Read a dictionary file.
    ///
    /// * one word per line - the line number is the id
    /// * `term<TAB>id` per line - explicit ids
    ///
    pub fn read_file(file: &str) -> anyhow::Result<Self> {
        let ReadLinesOut { lines, .. } = read_lines_of_words(file, -1)?;

        if lines.iter().all(|w| w.len() == 1) {
            return Self::from_terms(lines.into_iter().flatten().collect());
        }

        let mut term_to_id = HashMap::with_capacity(lines.len());
        for words in lines {
            if words.len() != 2 {
                return Err(anyhow::anyhow!("expected `term id`, found {:?}", words));
            }
            let id = words[1].parse::<usize>()?;
            if term_to_id.insert(words[0].clone(), id).is_some() {
                return Err(anyhow::anyhow!("duplicated term: {}", words[0]));
            }
        }
        Self::invert(term_to_id)
    }

    /// One `term<TAB>id` line per term
    pub fn write_file(&self, file: &str) -> anyhow::Result<()> {
        let lines = self
            .terms
            .iter()
            .enumerate()
            .map(|(id, t)| format!("{}\t{}", t, id))
            .collect::<Vec<_>>();
        write_lines(&lines, file)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn term(&self, id: usize) -> Option<&str> {
        self.terms.get(id).map(|t| t.as_ref())
    }

    pub fn id(&self, term: &str) -> Option<usize> {
        self.term_to_id.get(term).copied()
    }

    pub fn terms(&self) -> &[Box<str>] {
        &self.terms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invert_fills_every_id() -> anyhow::Result<()> {
        let map: HashMap<Box<str>, usize> = [("b", 1), ("a", 0), ("c", 2)]
            .into_iter()
            .map(|(t, i)| (Box::from(t), i))
            .collect();
        let dict = Dictionary::invert(map)?;
        assert_eq!(dict.term(0), Some("a"));
        assert_eq!(dict.term(2), Some("c"));
        assert_eq!(dict.id("b"), Some(1));
        Ok(())
    }

    #[test]
    fn invert_rejects_gaps() {
        let map: HashMap<Box<str>, usize> = [("a", 0), ("c", 2)]
            .into_iter()
            .map(|(t, i)| (Box::from(t), i))
            .collect();
        assert!(Dictionary::invert(map).is_err());
    }
}
