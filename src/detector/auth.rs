//! One step of the interactive login.
//!
//! The controller keeps the pending [`LoginStage`] between HTTP calls and
//! hands it to [`advance`] together with whatever the user sent. Tokens are
//! opaque to this module so any [`LoginBackend`] can drive it.

use std::future::Future;

use tracing::{info, warn};

use super::controller::ControlError;
use super::state::AuthState;
use crate::telegram::{LoginToken, PasswordToken, TelegramBot, TelegramError};

/// Why a code or password was not accepted.
#[derive(Debug)]
pub enum SignInFailure<P> {
    InvalidCode,
    /// The code was right; the account also has a 2FA password.
    PasswordRequired(P),
    /// Wrong password; carries the token for the next attempt.
    InvalidPassword(P),
    Other(TelegramError),
}

impl From<TelegramError> for SignInFailure<PasswordToken> {
    fn from(err: TelegramError) -> Self {
        match err {
            TelegramError::InvalidCode => Self::InvalidCode,
            TelegramError::PasswordRequired(token) => Self::PasswordRequired(token),
            TelegramError::InvalidPassword(token) => Self::InvalidPassword(token),
            other => Self::Other(other),
        }
    }
}

/// Client side of the login exchange.
pub trait LoginBackend {
    type CodeToken: Send;
    type PasswordToken: Send;

    /// Submits the login code sent to the user's Telegram app.
    fn submit_code(
        &self,
        token: &Self::CodeToken,
        code: &str,
    ) -> impl Future<Output = Result<(), SignInFailure<Self::PasswordToken>>> + Send;

    /// Submits the 2FA password.
    fn submit_password(
        &self,
        token: Self::PasswordToken,
        password: &str,
    ) -> impl Future<Output = Result<(), SignInFailure<Self::PasswordToken>>> + Send;
}

impl LoginBackend for TelegramBot {
    type CodeToken = LoginToken;
    type PasswordToken = PasswordToken;

    async fn submit_code(
        &self,
        token: &LoginToken,
        code: &str,
    ) -> Result<(), SignInFailure<PasswordToken>> {
        self.sign_in(token, code).await.map_err(SignInFailure::from)
    }

    async fn submit_password(
        &self,
        token: PasswordToken,
        password: &str,
    ) -> Result<(), SignInFailure<PasswordToken>> {
        self.check_password(token, password)
            .await
            .map_err(SignInFailure::from)
    }
}

/// A login waiting for user input.
#[derive(Debug)]
pub enum LoginStage<C, P> {
    AwaitingCode(C),
    AwaitingPassword(P),
}

impl<C, P> LoginStage<C, P> {
    /// Status reported while in this stage.
    pub const fn auth_state(&self) -> AuthState {
        match self {
            Self::AwaitingCode(_) => AuthState::SmsRequired,
            Self::AwaitingPassword(_) => AuthState::PasswordRequired,
        }
    }
}

/// Outcome of [`advance`].
#[derive(Debug)]
pub enum LoginStep<C, P> {
    /// The account is signed in.
    Authorized,
    /// More input is needed. The stage is kept, the result goes to the caller.
    Pending(LoginStage<C, P>, Result<AuthState, ControlError>),
    /// The login cannot continue and must be started over.
    Failed(ControlError),
}

/// Feeds the user's code and/or password into a pending login.
///
/// A code and a password may arrive together; the password is then used
/// right away if the code turns out to need one.
pub async fn advance<B: LoginBackend>(
    backend: &B,
    stage: LoginStage<B::CodeToken, B::PasswordToken>,
    code: Option<&str>,
    password: Option<&str>,
) -> LoginStep<B::CodeToken, B::PasswordToken> {
    let token = match stage {
        LoginStage::AwaitingCode(token) => token,
        LoginStage::AwaitingPassword(token) => {
            return match password {
                Some(password) => check_password(backend, token, password).await,
                None => LoginStep::Pending(
                    LoginStage::AwaitingPassword(token),
                    Err(ControlError::PasswordRequired),
                ),
            };
        }
    };

    let Some(code) = code else {
        return LoginStep::Pending(LoginStage::AwaitingCode(token), Err(ControlError::MissingCode));
    };

    match backend.submit_code(&token, code).await {
        Ok(()) => LoginStep::Authorized,
        Err(SignInFailure::PasswordRequired(password_token)) => match password {
            Some(password) => check_password(backend, password_token, password).await,
            None => {
                info!("2FA password required");
                LoginStep::Pending(
                    LoginStage::AwaitingPassword(password_token),
                    Ok(AuthState::PasswordRequired),
                )
            }
        },
        Err(SignInFailure::InvalidPassword(password_token)) => LoginStep::Pending(
            LoginStage::AwaitingPassword(password_token),
            Err(ControlError::InvalidPassword),
        ),
        Err(SignInFailure::InvalidCode) => {
            warn!("Invalid login code");
            LoginStep::Pending(LoginStage::AwaitingCode(token), Err(ControlError::InvalidCode))
        }
        // The code may still be good once the transient error is gone.
        Err(SignInFailure::Other(e)) => {
            warn!("Sign in failed: {}", e);
            LoginStep::Pending(LoginStage::AwaitingCode(token), Err(e.into()))
        }
    }
}

async fn check_password<B: LoginBackend>(
    backend: &B,
    token: B::PasswordToken,
    password: &str,
) -> LoginStep<B::CodeToken, B::PasswordToken> {
    match backend.submit_password(token, password).await {
        Ok(()) => LoginStep::Authorized,
        Err(SignInFailure::InvalidPassword(token) | SignInFailure::PasswordRequired(token)) => {
            warn!("Invalid 2FA password");
            LoginStep::Pending(
                LoginStage::AwaitingPassword(token),
                Err(ControlError::InvalidPassword),
            )
        }
        Err(SignInFailure::InvalidCode) => LoginStep::Failed(ControlError::InvalidCode),
        Err(SignInFailure::Other(e)) => LoginStep::Failed(e.into()),
    }
}
