//! systemd unit file rendering

/// A unit file: sections and keys in insertion order
#[derive(Debug, Default, Clone)]
pub struct Manifest {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key=value` in `section`, replacing an existing value for `key`
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        let value = value.into();
        let entries = match self.sections.iter().position(|(name, _)| name == section) {
            Some(i) => &mut self.sections[i].1,
            None => {
                self.sections.push((section.to_string(), Vec::new()));
                let last = self.sections.len() - 1;
                &mut self.sections[last].1
            }
        };
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(name, _)| name == section)
            .and_then(|(_, entries)| entries.iter().find(|(k, _)| k == key))
            .map(|(_, v)| v.as_str())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, (name, entries)) in self.sections.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&format!("[{name}]\n"));
            for (key, value) in entries {
                out.push_str(&format!("{key}={value}\n"));
            }
        }
        out
    }
}

/// Target a unit is enabled under, from its `[Install] WantedBy=`
pub fn wanted_by(definition: &str) -> &str {
    let mut in_install = false;
    for line in definition.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_install = line == "[Install]";
        } else if in_install && let Some(target) = line.strip_prefix("WantedBy=") {
            if let Some(first) = target.split_whitespace().next() {
                return first;
            }
        }
    }
    "multi-user.target"
}
