//! Reply tokens handed to approvers in invitations
//!
//! A token is the hex encoding of a CBOR array `[scheme id, step, approver,
//! passcode]`. It is only trusted once the passcode matches the one stored for
//! that approver in the addressed step.
use crate::error::{ApprovalError, Result};
use crate::scheme::ApprovalScheme;
use crate::types::{EntityRef, Passcode, SchemeId};

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
#[cbor(array)]
pub struct ReplyToken {
    #[n(0)]
    pub scheme_id: SchemeId,
    #[n(1)]
    pub step: u64,
    #[n(2)]
    pub approver: EntityRef,
    #[n(3)]
    pub passcode: Passcode,
}

impl ReplyToken {
    pub fn new(scheme_id: SchemeId, step: usize, approver: EntityRef, passcode: Passcode) -> Self {
        Self {
            scheme_id,
            step: step as u64,
            approver,
            passcode,
        }
    }

    pub fn step(&self) -> usize {
        usize::try_from(self.step).unwrap_or(usize::MAX)
    }

    pub fn encode(&self) -> Result<String> {
        Ok(hex::encode(minicbor::to_vec(self)?))
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = hex::decode(token.trim())
            .map_err(|_| ApprovalError::InvalidToken("not hex encoded".into()))?;
        minicbor::decode(&bytes).map_err(|_| ApprovalError::InvalidToken("malformed token".into()))
    }

    /// Checks the passcode against the approver entry of the addressed step.
    pub fn verify(&self, scheme: &ApprovalScheme) -> Result<()> {
        if scheme.id() != &self.scheme_id {
            return Err(ApprovalError::InvalidToken("token is for another scheme".into()));
        }
        let vote = scheme
            .steps()
            .get(self.step())
            .and_then(|step| step.vote_of(&self.approver))
            .ok_or_else(|| ApprovalError::InvalidToken("unknown approver".into()))?;
        if vote.passcode != self.passcode {
            return Err(ApprovalError::InvalidToken("passcode mismatch".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityKind;

    #[test]
    fn token_survives_text_transport() {
        let token = ReplyToken::new(
            SchemeId::from("scheme1abc"),
            2,
            EntityRef::new(EntityKind::Person, 42),
            Passcode::from("0badc0de"),
        );

        let text = token.encode().unwrap();
        assert!(text.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(ReplyToken::decode(&text).unwrap(), token);
    }

    #[test]
    fn garbage_is_an_invalid_token() {
        assert!(matches!(
            ReplyToken::decode("not a token"),
            Err(ApprovalError::InvalidToken(_))
        ));
        assert!(matches!(
            ReplyToken::decode("00ff"),
            Err(ApprovalError::InvalidToken(_))
        ));
    }
}
