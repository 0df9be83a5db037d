use md5::{Digest, Md5};

use crate::io::{BufMutExt, Encode};

/// A password response during startup, in whichever form the server's
/// `Authentication` request demanded.
#[derive(Debug)]
pub enum Password<'a> {
    Cleartext(&'a str),

    Md5 {
        password: &'a str,
        username: &'a str,
        salt: [u8; 4],
    },
}

impl Encode for Password<'_> {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(b'p');

        buf.put_length_prefixed(|buf| match self {
            Password::Cleartext(password) => {
                buf.put_str_nul(password);
            }

            Password::Md5 {
                password,
                username,
                salt,
            } => {
                // the actual `PasswordMessage` can be computed in SQL as
                //   concat('md5', md5(concat(md5(concat(password, username)), random-salt)))

                // keep in mind the md5() function returns its result as a hex string

                let mut hasher = Md5::new();

                hasher.update(password);
                hasher.update(username);

                let mut output = String::with_capacity(35);

                output.push_str(&hex::encode(hasher.finalize_reset()));

                hasher.update(&output);
                hasher.update(salt);

                output.clear();

                output.push_str("md5");
                output.push_str(&hex::encode(hasher.finalize()));

                buf.put_str_nul(&output);
            }
        });
    }
}
