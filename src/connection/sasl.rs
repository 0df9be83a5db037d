use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use stringprep::saslprep;

use crate::connection::stream::PgStream;
use crate::error::Error;
use crate::message::{
    Authentication, AuthenticationSasl, MessageFormat, SaslInitialResponse, SaslResponse,
};
use crate::options::PgConnectOptions;

const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

// the GS2 header for "client does not support channel binding", and its
// base64 form sent in the final message
const GS2_HEADER: &str = "n,,";
const CHANNEL_BINDING: &str = "biws";

const NONCE_LENGTH: usize = 24;

// Perform the SCRAM-SHA-256 exchange (RFC 5802, RFC 7677).
//
// The username attribute is left empty: postgres takes the authorization
// identity from the startup packet and requires the attribute to be ignored.
pub(super) async fn authenticate(
    stream: &mut PgStream,
    options: &PgConnectOptions,
    data: AuthenticationSasl,
) -> Result<(), Error> {
    if !data.mechanisms().any(|m| m == SCRAM_SHA_256) {
        let offered: Vec<&str> = data.mechanisms().collect();

        return Err(err_protocol!(
            "no supported SASL mechanism among {:?}",
            offered
        ));
    }

    let password = options.password.as_deref().unwrap_or_default();

    let client_nonce = nonce();
    let client_first_message_bare = format!("n=,r={}", client_nonce);
    let client_first_message = format!("{}{}", GS2_HEADER, client_first_message_bare);

    stream
        .send(SaslInitialResponse {
            mechanism: SCRAM_SHA_256,
            response: &client_first_message,
        })
        .await?;

    let server_first_message = match stream
        .recv_expect::<Authentication>(MessageFormat::Authentication)
        .await?
    {
        Authentication::SaslContinue(data) => String::from_utf8(data.to_vec())
            .map_err(|_| err_protocol!("server-first-message is not UTF-8"))?,

        other => {
            return Err(err_protocol!(
                "expected AuthenticationSASLContinue, received {:?}",
                other
            ));
        }
    };

    let (client_final_message, server_signature) = client_final(
        &client_first_message_bare,
        &server_first_message,
        &client_nonce,
        password,
    )?;

    stream.send(SaslResponse(&client_final_message)).await?;

    let server_final_message = match stream
        .recv_expect::<Authentication>(MessageFormat::Authentication)
        .await?
    {
        Authentication::SaslFinal(data) => String::from_utf8(data.to_vec())
            .map_err(|_| err_protocol!("server-final-message is not UTF-8"))?,

        other => {
            return Err(err_protocol!(
                "expected AuthenticationSASLFinal, received {:?}",
                other
            ));
        }
    };

    // the server proves knowledge of the (salted) password by signing the
    // same auth message; a mismatch means we are not talking to the server
    // that holds the verifier
    let verifier = attribute(&server_final_message, 'v')?;

    if verifier != server_signature {
        return Err(err_protocol!("mismatched SCRAM server signature"));
    }

    // Authentication::Ok follows; the startup loop consumes it
    Ok(())
}

// Nonce is a sequence of random printable ASCII, excluding ','
fn nonce() -> String {
    let mut rng = rand::thread_rng();

    (0..NONCE_LENGTH)
        .map(|_| {
            let mut c = rng.gen_range(0x21u8..0x7f);

            while c == b',' {
                c = rng.gen_range(0x21u8..0x7f);
            }

            c as char
        })
        .collect()
}

// Build the client-final-message and the expected base64 server signature.
fn client_final(
    client_first_message_bare: &str,
    server_first_message: &str,
    client_nonce: &str,
    password: &str,
) -> Result<(String, String), Error> {
    let server_nonce = attribute(server_first_message, 'r')?;
    let salt = attribute(server_first_message, 's')?;
    let iterations = attribute(server_first_message, 'i')?;

    // the server must only append to our nonce
    if !server_nonce.starts_with(client_nonce) || server_nonce.len() <= client_nonce.len() {
        return Err(err_protocol!("server did not extend the client nonce"));
    }

    let salt = base64::decode(salt).map_err(Error::protocol)?;
    let iterations: u32 = iterations.parse().map_err(Error::protocol)?;

    if iterations == 0 {
        return Err(err_protocol!("invalid SCRAM iteration count: 0"));
    }

    let password = saslprep(password)
        .map_err(|_| err_protocol!("password is not a valid SASLprep string"))?;

    // SaltedPassword := Hi(Normalize(password), salt, i)
    let salted_password = hi(password.as_bytes(), &salt, iterations)?;

    // ClientKey := HMAC(SaltedPassword, "Client Key")
    let client_key = hmac(&salted_password, b"Client Key")?;

    // StoredKey := H(ClientKey)
    let stored_key = Sha256::digest(client_key);

    let client_final_message_wo_proof =
        format!("c={},r={}", CHANNEL_BINDING, server_nonce);

    // AuthMessage := client-first-message-bare + "," +
    //                server-first-message + "," +
    //                client-final-message-without-proof
    let auth_message = format!(
        "{},{},{}",
        client_first_message_bare, server_first_message, client_final_message_wo_proof
    );

    // ClientSignature := HMAC(StoredKey, AuthMessage)
    let client_signature = hmac(&stored_key, auth_message.as_bytes())?;

    // ClientProof := ClientKey XOR ClientSignature
    let client_proof: Vec<u8> = client_key
        .iter()
        .zip(client_signature.iter())
        .map(|(a, b)| a ^ b)
        .collect();

    // ServerKey := HMAC(SaltedPassword, "Server Key")
    // ServerSignature := HMAC(ServerKey, AuthMessage)
    let server_key = hmac(&salted_password, b"Server Key")?;
    let server_signature = hmac(&server_key, auth_message.as_bytes())?;

    let client_final_message = format!(
        "{},p={}",
        client_final_message_wo_proof,
        base64::encode(client_proof)
    );

    Ok((client_final_message, base64::encode(server_signature)))
}

// Hi(str, salt, i) := PBKDF2-HMAC-SHA-256 with a single 32-octet block
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> Result<[u8; 32], Error> {
    let mut mac = Hmac::<Sha256>::new_from_slice(password)
        .map_err(|_| err_protocol!("HMAC can take a key of any size"))?;

    mac.update(salt);
    mac.update(&1u32.to_be_bytes());

    let mut u = mac.finalize().into_bytes();
    let mut result: [u8; 32] = u.into();

    for _ in 1..iterations {
        let mut mac = Hmac::<Sha256>::new_from_slice(password)
            .map_err(|_| err_protocol!("HMAC can take a key of any size"))?;

        mac.update(&u);
        u = mac.finalize().into_bytes();

        for (r, u) in result.iter_mut().zip(u.iter()) {
            *r ^= u;
        }
    }

    Ok(result)
}

fn hmac(key: &[u8], data: &[u8]) -> Result<[u8; 32], Error> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|_| err_protocol!("HMAC can take a key of any size"))?;

    mac.update(data);

    Ok(mac.finalize().into_bytes().into())
}

// Extract `<key>=<value>` out of a comma-separated SCRAM message.
fn attribute<'a>(message: &'a str, key: char) -> Result<&'a str, Error> {
    message
        .split(',')
        .find_map(|attr| {
            let mut chars = attr.chars();

            (chars.next() == Some(key) && chars.next() == Some('='))
                .then(|| &attr[2..])
        })
        .ok_or_else(|| err_protocol!("SCRAM message missing attribute {:?}", key))
}
