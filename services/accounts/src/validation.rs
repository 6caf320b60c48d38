//! Input validation for new registrations
//!
//! All rules are pure. Format, length and mismatch problems are reported as
//! bad requests; a password missing its digit or special character is
//! reported as forbidden content.

use common::{AppError, AppResult};
use regex::Regex;
use secrecy::ExposeSecret;
use std::sync::OnceLock;

use crate::models::NewUser;

pub const USERNAME_MIN_LENGTH: usize = 5;
pub const USERNAME_MAX_LENGTH: usize = 20;
pub const PASSWORD_MIN_LENGTH: usize = 8;

/// Validate every field of a registration, in field order
pub fn validate_new_user(new_user: &NewUser) -> AppResult<()> {
    const CONTEXT: &str = "validation::validate_new_user";
    let wrap = |err: AppError| err.wrap(CONTEXT, Some(format!("newUser: {:?}", new_user)));

    validate_username(&new_user.username).map_err(wrap)?;
    validate_emails(&new_user.email, &new_user.confirm_email).map_err(wrap)?;
    validate_passwords(
        new_user.password.expose_secret(),
        new_user.confirm_password.expose_secret(),
    )
    .map_err(wrap)?;
    if let Some(phone_number) = &new_user.phone_number {
        validate_phone_number(phone_number).map_err(wrap)?;
    }

    Ok(())
}

/// Validate username length
pub fn validate_username(username: &str) -> AppResult<()> {
    let length = username.chars().count();
    if !(USERNAME_MIN_LENGTH..=USERNAME_MAX_LENGTH).contains(&length) {
        return Err(AppError::validation(
            "Username must contain between 5 and 20 characters",
            "validation::validate_username",
        )
        .with_argument(format!("username: {}", username)));
    }
    Ok(())
}

/// Validate that both emails match and are well formed
pub fn validate_emails(email: &str, confirm_email: &str) -> AppResult<()> {
    const CONTEXT: &str = "validation::validate_emails";
    let argument = || format!("email: {}, confirmEmail: {}", email, confirm_email);

    if email != confirm_email {
        return Err(
            AppError::validation("Provided emails do not match", CONTEXT).with_argument(argument())
        );
    }

    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    if !regex.is_match(email) {
        return Err(AppError::validation("Invalid email format", CONTEXT).with_argument(argument()));
    }

    Ok(())
}

/// Validate that both passwords match and are strong enough
///
/// Password arguments are never attached to the error.
pub fn validate_passwords(password: &str, confirm_password: &str) -> AppResult<()> {
    const CONTEXT: &str = "validation::validate_passwords";

    if password != confirm_password {
        return Err(AppError::validation(
            "Provided passwords are not the same",
            CONTEXT,
        ));
    }

    if password.chars().count() < PASSWORD_MIN_LENGTH {
        return Err(AppError::validation(
            "Password must contain at least 8 characters",
            CONTEXT,
        ));
    }

    if !contains_digit_and_special(password) {
        return Err(AppError::forbidden(
            "Password must contain at least one digit and one special character",
            CONTEXT,
        ));
    }

    Ok(())
}

fn contains_digit_and_special(password: &str) -> bool {
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(is_special);
    has_digit && has_special
}

// Punctuation or symbol; outside ASCII anything that is not a letter, digit,
// whitespace or control character counts.
fn is_special(c: char) -> bool {
    c.is_ascii_punctuation()
        || (!c.is_ascii() && !c.is_alphanumeric() && !c.is_whitespace() && !c.is_control())
}

/// Validate an optional phone number
pub fn validate_phone_number(phone_number: &str) -> AppResult<()> {
    static PHONE_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = PHONE_REGEX.get_or_init(|| {
        Regex::new(r"^\+?[0-9]{7,15}$").expect("Failed to compile phone number regex")
    });

    if !regex.is_match(phone_number) {
        return Err(AppError::validation(
            "Invalid phone number format",
            "validation::validate_phone_number",
        )
        .with_argument(format!("phoneNumber: {}", phone_number)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ErrorKind, StatusClass};
    use secrecy::SecretString;

    fn new_user(username: &str, email: &str, password: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            confirm_email: email.to_string(),
            password: SecretString::new(password.to_string()),
            confirm_password: SecretString::new(password.to_string()),
            phone_number: None,
        }
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("wojciech96").is_ok());
        assert!(validate_username("wojciechignasiak96").is_ok());
        assert!(validate_username("abcde").is_ok());
        assert!(validate_username("a".repeat(20).as_str()).is_ok());

        let err = validate_username("wk96").unwrap_err();
        assert_eq!(err.status(), StatusClass::BadRequest);
        assert_eq!(
            err.message(),
            "Username must contain between 5 and 20 characters"
        );
        assert_eq!(err.argument(), Some("username: wk96"));

        let err = validate_username("tooLongUsername1996!!!").unwrap_err();
        assert_eq!(err.status().as_u16(), 400);
    }

    #[test]
    fn test_validate_emails() {
        assert!(
            validate_emails(
                "wojciech_ignasiak@icloud.com",
                "wojciech_ignasiak@icloud.com"
            )
            .is_ok()
        );

        let err = validate_emails(
            "wojciech_ignasiak@icloud.com",
            "ignasiak_wojciech@icloud.com",
        )
        .unwrap_err();
        assert_eq!(err.message(), "Provided emails do not match");
        assert_eq!(
            err.argument(),
            Some("email: wojciech_ignasiak@icloud.com, confirmEmail: ignasiak_wojciech@icloud.com")
        );

        let err = validate_emails("wojciech_ignasiakicloud.com", "wojciech_ignasiakicloud.com")
            .unwrap_err();
        assert_eq!(err.message(), "Invalid email format");
        assert_eq!(err.status(), StatusClass::BadRequest);

        assert!(validate_emails("a@b.c", "a@b.c").is_err());
        assert!(validate_emails("a@b.com", "a@b.com").is_ok());
    }

    #[test]
    fn test_validate_passwords() {
        assert!(validate_passwords("!hardPassw0rd.", "!hardPassw0rd.").is_ok());

        let err = validate_passwords("a!hardPassw0rd.", "!hardPassw0rd.").unwrap_err();
        assert_eq!(err.message(), "Provided passwords are not the same");
        assert_eq!(err.status(), StatusClass::BadRequest);
        assert_eq!(err.argument(), None);

        let err = validate_passwords("!har1", "!har1").unwrap_err();
        assert_eq!(err.message(), "Password must contain at least 8 characters");
        assert_eq!(err.status(), StatusClass::BadRequest);

        let err = validate_passwords("hardpassword", "hardpassword").unwrap_err();
        assert_eq!(
            err.message(),
            "Password must contain at least one digit and one special character"
        );
        assert_eq!(err.status(), StatusClass::Forbidden);
        assert_eq!(err.kind(), &ErrorKind::Validation);

        let err = validate_passwords("hard1234", "hard1234").unwrap_err();
        assert_eq!(err.status().as_u16(), 403);

        let err = validate_passwords("hard!!!!", "hard!!!!").unwrap_err();
        assert_eq!(err.status().as_u16(), 403);

        assert!(validate_passwords("12345678$", "12345678$").is_ok());
    }

    #[test]
    fn test_validate_phone_number() {
        assert!(validate_phone_number("+1234567").is_ok());
        assert!(validate_phone_number("123456789012345").is_ok());
        assert!(validate_phone_number("12345").is_err());
        assert!(validate_phone_number("+1234567890123456").is_err());
        assert!(validate_phone_number("+12 345 678").is_err());
    }

    #[test]
    fn test_validate_new_user_reports_first_failure_with_context() {
        let mut user = new_user("wojciech96", "a@b.com", "!hardPassw0rd.");
        assert!(validate_new_user(&user).is_ok());

        user.confirm_email = "b@b.com".to_string();
        let err = validate_new_user(&user).unwrap_err();
        assert_eq!(err.context(), "validation::validate_new_user");
        assert_eq!(err.message(), "Provided emails do not match");
        assert_eq!(err.root().context(), "validation::validate_emails");

        let mut user = new_user("wojciech96", "a@b.com", "!hardPassw0rd.");
        user.phone_number = Some("12345".to_string());
        let err = validate_new_user(&user).unwrap_err();
        assert_eq!(err.message(), "Invalid phone number format");
    }

    #[test]
    fn test_validate_new_user_never_leaks_password() {
        let user = new_user("wk96", "a@b.com", "!hardPassw0rd.");
        let err = validate_new_user(&user).unwrap_err();
        let argument = err.argument().unwrap_or_default();

        assert!(argument.contains("wk96"));
        assert!(!argument.contains("hardPassw0rd"));
    }
}
