use std::fmt;

const UNSCOPED: &str = "all";

/// Cache key of the form `resource:<scope|all>`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn scoped(resource: &str, scope: Option<&str>) -> Self {
        let scope = scope.filter(|s| !s.is_empty()).unwrap_or(UNSCOPED);
        Self(format!("{resource}:{scope}"))
    }

    /// Prefix matching every scope of `resource`.
    pub fn prefix(resource: &str) -> String {
        format!("{resource}:")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<CacheKey> for String {
    fn from(value: CacheKey) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_defaults_to_all() {
        assert_eq!(CacheKey::scoped("dashboard", None).as_str(), "dashboard:all");
        assert_eq!(CacheKey::scoped("dashboard", Some("")).as_str(), "dashboard:all");
        assert_eq!(
            CacheKey::scoped("dashboard", Some("p-7")).to_string(),
            "dashboard:p-7"
        );
        assert!(CacheKey::scoped("dashboard", Some("p-7"))
            .as_str()
            .starts_with(&CacheKey::prefix("dashboard")));
    }
}
