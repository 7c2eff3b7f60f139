// Database provisioning: identifier validation and CREATE DATABASE generation (MySQL).
//
// - Identifiers are validated first, then backtick-quoted
// - Creation is idempotent (IF NOT EXISTS) and pins a Unicode charset/collation

pub const DEFAULT_COLLATION: &str = "utf8mb4_unicode_ci";

const MAX_DB_NAME_LEN: usize = 64;
const RESERVED: [&str; 4] = ["mysql", "information_schema", "performance_schema", "sys"];

/// Validate database name (letters, digits, `_`, `$`; 1-64 chars; not a system schema).
pub fn validate_db_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Database name is required.".to_string());
    }
    if name.len() > MAX_DB_NAME_LEN {
        return Err(format!(
            "Database name must be {} characters or fewer.",
            MAX_DB_NAME_LEN
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    {
        return Err(
            "Database name may only contain letters, numbers, underscores and '$'.".to_string(),
        );
    }
    if name.chars().all(|c| c.is_ascii_digit()) {
        return Err("Database name cannot consist of digits only.".to_string());
    }
    if RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name)) {
        return Err(format!("'{}' is a reserved database name.", name));
    }
    Ok(())
}

fn backtick_quote(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// `CREATE DATABASE IF NOT EXISTS` with utf8mb4 / utf8mb4_unicode_ci.
pub fn create_database_stmt(db_name: &str) -> String {
    format!(
        "CREATE DATABASE IF NOT EXISTS {} CHARACTER SET utf8mb4 COLLATE {}",
        backtick_quote(db_name.trim()),
        DEFAULT_COLLATION
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_db_name_valid() {
        assert!(validate_db_name("app_db").is_ok());
        assert!(validate_db_name("Waslne2024").is_ok());
        assert!(validate_db_name("  padded  ").is_ok());
    }

    #[test]
    fn test_validate_db_name_invalid() {
        assert!(validate_db_name("").is_err());
        assert!(validate_db_name("app-db").is_err());
        assert!(validate_db_name("app db").is_err());
        assert!(validate_db_name("a`b").is_err());
        assert!(validate_db_name("12345").is_err());
        assert!(validate_db_name("MySQL").is_err());
        assert!(validate_db_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_create_database_stmt() {
        assert_eq!(
            create_database_stmt("app_db"),
            "CREATE DATABASE IF NOT EXISTS `app_db` CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci"
        );
    }

    #[test]
    fn test_backtick_quote_escaping() {
        assert_eq!(backtick_quote("we`ird"), "`we``ird`");
    }
}
