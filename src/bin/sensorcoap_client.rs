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
use std::time::Duration;

use clap::{Parser, ValueEnum};
use rand::Rng;
use sensorcoap::protocol::{Code, Message, MessageType, PacketCodec, OPTION_URI_PATH};
use sensorcoap::{AppError, AppResult};
use tokio::net::UdpSocket;
use tokio::time;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl From<Method> for Code {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => Code::Get,
            Method::Post => Code::Post,
            Method::Put => Code::Put,
            Method::Delete => Code::Delete,
        }
    }
}

/// Sends one request to a sensor server and prints the response.
///
/// Examples:
///   sensorcoap-client 127.0.0.1 get data/1
///   sensorcoap-client 127.0.0.1 put data/1 25
///   sensorcoap-client 127.0.0.1 post "" 23.5
#[derive(Parser)]
#[command(version, verbatim_doc_comment)]
struct CommandLine {
    /// server host or ip
    server: String,
    #[arg(value_enum, ignore_case = true)]
    method: Method,
    /// path, each `/` separated segment becomes one Uri-Path option
    uri: Option<String>,
    payload: Option<String>,
    #[arg(short, long, default_value_t = 5683)]
    port: u16,
    /// send a non-confirmable request
    #[arg(long)]
    non: bool,
    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,
    /// resend the same datagram this many times when no response arrives
    #[arg(long, default_value_t = 1)]
    retries: u32,
}

fn build_request(commandline: &CommandLine, message_id: u16) -> Message {
    let message_type = if commandline.non {
        MessageType::NonConfirmable
    } else {
        MessageType::Confirmable
    };
    let mut request = Message::new(message_type, commandline.method.into(), message_id);
    if let Some(uri) = &commandline.uri {
        for segment in uri.split('/').filter(|s| !s.is_empty()) {
            request = request.with_option(OPTION_URI_PATH, segment.as_bytes().to_vec());
        }
    }
    if let Some(payload) = &commandline.payload {
        request = request.with_payload(payload.as_bytes().to_vec());
    }
    request
}

fn print_response(datagram: &[u8], codec: &PacketCodec) {
    println!("raw response: {datagram:02x?}");
    match codec.decode(datagram) {
        Ok(response) => {
            println!(
                "ver={} type={:?} code={} mid={}",
                response.version, response.message_type, response.code, response.message_id
            );
            if !response.payload.is_empty() {
                println!("payload: {}", String::from_utf8_lossy(&response.payload));
            }
        }
        Err(err) => println!("undecodable response: {err}"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> AppResult<()> {
    let commandline = CommandLine::parse();
    let codec = PacketCodec::default();

    let message_id: u16 = rand::thread_rng().gen();
    let request = build_request(&commandline, message_id);
    let datagram = codec
        .encode(&request)
        .map_err(|err| AppError::InvalidValue(err.to_string()))?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket
        .connect((commandline.server.as_str(), commandline.port))
        .await?;

    let timeout = Duration::from_millis(commandline.timeout_ms);
    let mut buffer = vec![0u8; codec.max_message_size()];
    for attempt in 0..=commandline.retries {
        if attempt > 0 {
            println!("no response within {timeout:?}, retransmitting");
        }
        socket.send(&datagram).await?;
        if let Ok(received) = time::timeout(timeout, socket.recv(&mut buffer)).await {
            print_response(&buffer[..received?], &codec);
            return Ok(());
        }
    }
    Err(AppError::DetailedIoError(format!(
        "no response from {}:{} for mid={message_id}",
        commandline.server, commandline.port
    )))
}
