// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::errors::ValidationError;
use super::message::{Message, MAX_TOKEN_LENGTH, PROTOCOL_VERSION};

/// Protocol-level checks, run on every decoded message before dispatch.
/// Method semantics are not looked at here.
pub struct MessageValidator;

impl MessageValidator {
    pub fn validate(message: &Message) -> bool {
        Self::check(message).is_ok()
    }

    pub fn check(message: &Message) -> Result<(), ValidationError> {
        if message.version != PROTOCOL_VERSION {
            return Err(ValidationError::BadVersion(message.version));
        }
        if message.token_length() > MAX_TOKEN_LENGTH {
            return Err(ValidationError::BadTokenLength(message.token_length()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::protocol::{Code, MessageType};

    #[rstest]
    #[case(0)]
    #[case(2)]
    #[case(3)]
    fn test_rejects_other_versions(#[case] version: u8) {
        let mut message = Message::new(MessageType::Confirmable, Code::Get, 1);
        message.version = version;
        assert!(!MessageValidator::validate(&message));
        assert_eq!(
            MessageValidator::check(&message),
            Err(ValidationError::BadVersion(version))
        );
    }

    #[test]
    fn test_rejects_long_token() {
        let message =
            Message::new(MessageType::Confirmable, Code::Get, 1).with_token(vec![0u8; 9]);
        assert_eq!(
            MessageValidator::check(&message),
            Err(ValidationError::BadTokenLength(9))
        );
    }

    #[test]
    fn test_accepts_version_one() {
        let message =
            Message::new(MessageType::NonConfirmable, Code::Unknown(31), 1).with_token(vec![0u8; 8]);
        assert!(MessageValidator::validate(&message));
    }
}
