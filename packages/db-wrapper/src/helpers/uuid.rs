use uuid::Uuid;

use crate::error::AppError;

pub fn is_uuid(candidate: &str) -> bool {
    Uuid::parse_str(candidate).is_ok()
}

pub fn validate_uuid(id: &str) -> Result<(), AppError> {
    if is_uuid(id) {
        Ok(())
    } else {
        Err(AppError::bad_arguments(format!(
            "The ID {id} is not a valid UUID"
        )))
    }
}

pub fn validate_uuids<'a, I>(ids: I) -> Result<(), AppError>
where
    I: IntoIterator<Item = &'a str>,
{
    ids.into_iter().try_for_each(validate_uuid)
}

pub fn convert_to_uuid(id: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id)
        .map_err(|_| AppError::bad_arguments(format!("The ID {id} is not a valid UUID")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "8c1f6f0e-2d7c-4a53-9a43-6c0c4f7fb3a1";

    #[test]
    fn accepts_hyphenated_and_simple_forms() {
        assert!(is_uuid(VALID));
        assert!(is_uuid("8c1f6f0e2d7c4a539a436c0c4f7fb3a1"));
        assert!(!is_uuid("123"));
        assert!(!is_uuid(""));
    }

    #[test]
    fn validate_reports_offending_id() {
        let err = validate_uuid("not-a-uuid").unwrap_err();
        assert!(matches!(err, AppError::BadArguments { .. }));
        assert!(err.to_string().contains("not-a-uuid"));
    }

    #[test]
    fn validate_many_stops_at_first_bad_id() {
        assert!(validate_uuids([VALID, VALID]).is_ok());
        let err = validate_uuids([VALID, "bad", "worse"]).unwrap_err();
        assert!(err.to_string().contains("bad"));
        assert!(!err.to_string().contains("worse"));
    }

    #[test]
    fn convert_round_trips() {
        let id = convert_to_uuid(VALID).unwrap();
        assert_eq!(id.to_string(), VALID);
        assert!(convert_to_uuid("nope").is_err());
    }
}
