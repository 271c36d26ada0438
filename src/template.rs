use crate::{NetdumpError, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, TimeZone};
use std::fmt::{Display, Write};
use std::path::PathBuf;

/// An output path containing strftime tokens, rendered once per file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    template: String,
}

impl PathTemplate {
    /// Validates `template` without touching the filesystem.
    ///
    /// A template that renders to itself has no time tokens, so every
    /// rotation would overwrite the same file; it is rejected.
    pub fn parse(template: &str) -> Result<Self> {
        if template.is_empty() {
            return Err(NetdumpError::Config(
                "output file name must be specified".to_string(),
            ));
        }

        if StrftimeItems::new(template).any(|item| matches!(item, Item::Error)) {
            return Err(NetdumpError::InvalidTemplate {
                template: template.to_string(),
                reason: "unrecognized strftime specifier".to_string(),
            });
        }

        let parsed = Self {
            template: template.to_string(),
        };
        if parsed.render(&Local::now())?.as_os_str() == template {
            return Err(NetdumpError::TemplateWithoutTimeFormat(
                template.to_string(),
            ));
        }

        Ok(parsed)
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    pub fn render<Tz>(&self, at: &DateTime<Tz>) -> Result<PathBuf>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let mut rendered = String::with_capacity(self.template.len() + 16);
        write!(
            rendered,
            "{}",
            at.format_with_items(StrftimeItems::new(&self.template))
        )
        .map_err(|_| NetdumpError::InvalidTemplate {
            template: self.template.clone(),
            reason: "failed to render time format".to_string(),
        })?;
        Ok(PathBuf::from(rendered))
    }

    pub fn render_now(&self) -> Result<PathBuf> {
        self.render(&Local::now())
    }
}
