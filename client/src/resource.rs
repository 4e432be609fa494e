use core::fmt;
use std::ops::Add;

use url::Url;

const SEP: char = '/';

/// Service URL builder. Path pieces are appended segment by segment so a
/// base with or without trailing slash behaves the same.
#[derive(Clone)]
pub struct Resource {
    url: Url,
}

impl Resource {
    #[must_use]
    pub fn new(uri: &str) -> Option<Resource> {
        let base = Url::parse(uri).ok()?;
        Some(Resource { url: base })
    }

    pub fn append_path(&mut self, path: &str) -> &mut Self {
        if let Some(segments) = self.url.path_segments() {
            let p = segments
                .chain(path.split(SEP))
                .filter(|x| !x.is_empty())
                .fold(String::new(), |s, x| {
                    let mut y = s.add(x);
                    y.push(SEP);
                    y
                });

            let path_to_set = if path.ends_with(SEP) || p.is_empty() {
                &p
            } else {
                &p[..p.len() - 1]
            };
            self.url.set_path(path_to_set);
        } else if let Ok(u) = self.url.join(path) {
            self.url = u;
        }
        self
    }

    /// Appends one already stored file name, escaping it as a single segment.
    pub fn append_file_name(&mut self, file_name: &str) -> &mut Self {
        let escaped = url_escape::encode_component(file_name);
        self.append_path(&escaped)
    }

    pub fn append_query(&mut self, key: &str, value: &str) -> &mut Self {
        self.url.query_pairs_mut().append_pair(key, value);
        self
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
