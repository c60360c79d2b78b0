use uuid::Uuid;

pub type UserId = Uuid;
pub type CreditTransactionId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Mask the local part of an email address for log fields, keeping the domain
/// Example: "jane.doe@example.com" -> "ja***@example.com"
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let visible: String = local.chars().take(2).collect();
            format!("{visible}***@{domain}")
        }
        None => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_uuid() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("jane.doe@example.com"), "ja***@example.com");
        assert_eq!(mask_email("x@example.com"), "x***@example.com");
        assert_eq!(mask_email("not-an-email"), "***");
    }
}
