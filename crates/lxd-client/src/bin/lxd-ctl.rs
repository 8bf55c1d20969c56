// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! LXD Control CLI
//!
//! Small command-line front end over lxd-client.
//!
//! Usage:
//!   lxd-ctl <command> [options]
//!
//! Commands:
//!   list                          List instances
//!   create --image <alias> [--vm] [--name <name>] [--config k=v]...
//!   state <instance>              Show instance state
//!   exec <instance> [options] -- <command...>
//!   push <instance> <local> <remote> [--uid n] [--gid n] [--mode octal]
//!   pull <instance> <remote>
//!   forwards <network>            List port forwards
//!   forward <network> <listen-address> <port> <target-address> [<target-port>] [--udp]

use std::process::ExitCode;

use lxd_client::{
    Client, CreateInstanceRequest, ExecRequest, FileContent, FileHeader, ForwardAddress,
    ForwardPort, InstanceSource, InstanceType, LxdConfig, Protocol,
};
use tokio::io::AsyncWriteExt;

fn print_usage() {
    eprintln!(
        r#"Usage: lxd-ctl <command> [options]

Talk to an LXD server.

COMMANDS:
    list                            List instances
    create                          Create and start an instance
    state <instance>                Show instance state
    exec <instance> -- <cmd...>     Run a command, streaming stdin/stdout/stderr
    push <instance> <local> <remote>   Upload a file
    pull <instance> <remote>        Download a file or list a directory
    forwards <network>              List port forwards on a network
    forward <network> <listen> <port> <target> [<target-port>]
                                    Add or replace a forwarded port

CREATE OPTIONS:
    --image <alias>                 Image alias (required)
    --server <url>                  Remote simplestreams image server
    --name <name>                   Instance name (server picks one if omitted)
    --vm                            Create a virtual machine instead of a container
    --config <key=value>            Instance config entry (repeatable)

EXEC OPTIONS:
    --cwd <dir>                     Working directory
    --user <uid>                    User id to run as
    --group <gid>                   Group id to run as
    --env <key=value>               Environment entry (repeatable)

PUSH OPTIONS:
    --uid <n>                       Owner uid
    --gid <n>                       Owner gid
    --mode <octal>                  Permission bits, e.g. 0644

FORWARD OPTIONS:
    --udp                           Forward UDP instead of TCP

ENVIRONMENT:
    LXD_ENDPOINT                    Server host:port (default: 127.0.0.1:8443)
    LXD_PROJECT                     Project to operate in
    LXD_CLIENT_CERT, LXD_CLIENT_KEY PEM client certificate and key
    LXD_SERVER_CERT                 PEM server certificate to trust
    LXD_SKIP_CERT_VERIFICATION      Skip TLS verification (default: false)
    LXD_WAIT_TIMEOUT_S              Server-side operation wait timeout
    RUST_LOG                        Log filter (default: warn)

EXAMPLES:
    # Create a container from a remote image
    lxd-ctl create --image ubuntu/24.04 --server https://images.lxd.canonical.com --name wow

    # Run a command
    lxd-ctl exec wow -- sh -c 'echo hello'

    # Expose a port
    lxd-ctl forward lxdbr0 192.0.2.10 25565 10.0.0.5
"#
    );
}

#[derive(Debug)]
enum Command {
    List,
    Create {
        image: String,
        server: Option<String>,
        name: Option<String>,
        vm: bool,
        config: Vec<(String, String)>,
    },
    State {
        instance: String,
    },
    Exec {
        instance: String,
        cwd: Option<String>,
        user: Option<u32>,
        group: Option<u32>,
        env: Vec<(String, String)>,
        command: Vec<String>,
    },
    Push {
        instance: String,
        local: String,
        remote: String,
        uid: Option<u32>,
        gid: Option<u32>,
        mode: Option<u32>,
    },
    Pull {
        instance: String,
        remote: String,
    },
    Forwards {
        network: String,
    },
    Forward {
        network: String,
        listen_address: String,
        port: String,
        target_address: String,
        target_port: Option<String>,
        udp: bool,
    },
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from_vec(&args)
}

fn parse_key_value(raw: &str, flag: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("{} expects key=value, got '{}'", flag, raw))
}

fn parse_id(raw: Option<&String>, flag: &str) -> Result<u32, String> {
    raw.ok_or(format!("{} requires a number", flag))?
        .parse()
        .map_err(|_| format!("Invalid {}", flag))
}

fn parse_args_from_vec(args: &[String]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("No command specified".to_string());
    }

    match args[1].as_str() {
        "help" | "--help" | "-h" => {
            print_usage();
            std::process::exit(0);
        }
        "list" => Ok(Command::List),
        "create" => {
            let mut image: Option<String> = None;
            let mut server: Option<String> = None;
            let mut name: Option<String> = None;
            let mut vm = false;
            let mut config = Vec::new();

            let mut i = 2;
            while i < args.len() {
                match args[i].as_str() {
                    "--image" => {
                        i += 1;
                        image = Some(args.get(i).ok_or("--image requires an alias")?.clone());
                    }
                    "--server" => {
                        i += 1;
                        server = Some(args.get(i).ok_or("--server requires a URL")?.clone());
                    }
                    "--name" => {
                        i += 1;
                        name = Some(args.get(i).ok_or("--name requires a value")?.clone());
                    }
                    "--vm" => vm = true,
                    "--config" => {
                        i += 1;
                        let raw = args.get(i).ok_or("--config requires key=value")?;
                        config.push(parse_key_value(raw, "--config")?);
                    }
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
                i += 1;
            }

            Ok(Command::Create {
                image: image.ok_or("--image is required")?,
                server,
                name,
                vm,
                config,
            })
        }
        "state" => {
            let instance = args.get(2).ok_or("Instance name required")?.clone();
            Ok(Command::State { instance })
        }
        "exec" => {
            let instance = args.get(2).ok_or("Instance name required")?.clone();
            let mut cwd: Option<String> = None;
            let mut user: Option<u32> = None;
            let mut group: Option<u32> = None;
            let mut env = Vec::new();
            let mut command: Vec<String> = Vec::new();

            let mut i = 3;
            while i < args.len() {
                match args[i].as_str() {
                    "--" => {
                        command = args[i + 1..].to_vec();
                        break;
                    }
                    "--cwd" => {
                        i += 1;
                        cwd = Some(args.get(i).ok_or("--cwd requires a directory")?.clone());
                    }
                    "--user" => {
                        i += 1;
                        user = Some(parse_id(args.get(i), "--user")?);
                    }
                    "--group" => {
                        i += 1;
                        group = Some(parse_id(args.get(i), "--group")?);
                    }
                    "--env" => {
                        i += 1;
                        let raw = args.get(i).ok_or("--env requires key=value")?;
                        env.push(parse_key_value(raw, "--env")?);
                    }
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
                i += 1;
            }

            if command.is_empty() {
                return Err("Command required after --".to_string());
            }

            Ok(Command::Exec {
                instance,
                cwd,
                user,
                group,
                env,
                command,
            })
        }
        "push" => {
            let instance = args.get(2).ok_or("Instance name required")?.clone();
            let local = args.get(3).ok_or("Local path required")?.clone();
            let remote = args.get(4).ok_or("Remote path required")?.clone();
            let mut uid: Option<u32> = None;
            let mut gid: Option<u32> = None;
            let mut mode: Option<u32> = None;

            let mut i = 5;
            while i < args.len() {
                match args[i].as_str() {
                    "--uid" => {
                        i += 1;
                        uid = Some(parse_id(args.get(i), "--uid")?);
                    }
                    "--gid" => {
                        i += 1;
                        gid = Some(parse_id(args.get(i), "--gid")?);
                    }
                    "--mode" => {
                        i += 1;
                        let raw = args.get(i).ok_or("--mode requires an octal value")?;
                        mode = Some(
                            u32::from_str_radix(raw, 8).map_err(|_| "Invalid --mode (octal)")?,
                        );
                    }
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
                i += 1;
            }

            Ok(Command::Push {
                instance,
                local,
                remote,
                uid,
                gid,
                mode,
            })
        }
        "pull" => {
            let instance = args.get(2).ok_or("Instance name required")?.clone();
            let remote = args.get(3).ok_or("Remote path required")?.clone();
            Ok(Command::Pull { instance, remote })
        }
        "forwards" => {
            let network = args.get(2).ok_or("Network name required")?.clone();
            Ok(Command::Forwards { network })
        }
        "forward" => {
            let mut positional = Vec::new();
            let mut udp = false;
            for arg in &args[2..] {
                match arg.as_str() {
                    "--udp" => udp = true,
                    flag if flag.starts_with("--") => {
                        return Err(format!("Unknown argument: {}", flag));
                    }
                    value => positional.push(value.to_string()),
                }
            }

            let mut positional = positional.into_iter();
            let network = positional.next().ok_or("Network name required")?;
            let listen_address = positional.next().ok_or("Listen address required")?;
            let port = positional.next().ok_or("Port required")?;
            let target_address = positional.next().ok_or("Target address required")?;
            let target_port = positional.next();
            if let Some(extra) = positional.next() {
                return Err(format!("Unexpected argument: {}", extra));
            }

            Ok(Command::Forward {
                network,
                listen_address,
                port,
                target_address,
                target_port,
                udp,
            })
        }
        cmd => Err(format!("Unknown command: {}", cmd)),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cmd = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    let config = match LxdConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let client = match Client::new(config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to create client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Dropping the command future aborts the in-flight request.
    let result = runtime.block_on(async {
        tokio::select! {
            result = execute_command(&client, cmd) => result,
            _ = tokio::signal::ctrl_c() => Err("Interrupted".to_string()),
        }
    });

    // A pending terminal read on the blocking pool must not hold up exit.
    runtime.shutdown_background();

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute_command(client: &Client, cmd: Command) -> Result<ExitCode, String> {
    match cmd {
        Command::List => {
            let instances = client.list_instances().await.map_err(|e| e.to_string())?;
            for path in instances {
                println!("{}", path.name().unwrap_or_default());
            }
        }

        Command::Create {
            image,
            server,
            name,
            vm,
            config,
        } => {
            let source = match server {
                Some(server) => InstanceSource::remote_image(server, image),
                None => InstanceSource::image(image),
            };
            let mut request = CreateInstanceRequest::new(source);
            request.name = name;
            if vm {
                request = request.with_type(InstanceType::VirtualMachine);
            }
            for (key, value) in config {
                request = request.with_config(key, value);
            }

            let instance = client
                .create_instance_and_wait(&request)
                .await
                .map_err(|e| e.to_string())?;
            println!("Created instance: {}", instance.name());
        }

        Command::State { instance } => {
            let state = client
                .instance(&instance)
                .state()
                .await
                .map_err(|e| e.to_string())?;
            println!(
                "{}",
                serde_json::to_string_pretty(&state).map_err(|e| e.to_string())?
            );
        }

        Command::Exec {
            instance,
            cwd,
            user,
            group,
            env,
            command,
        } => {
            let mut request = ExecRequest::new(command);
            request.cwd = cwd;
            request.user = user;
            request.group = group;
            for (key, value) in env {
                request = request.with_env(key, value);
            }

            let session = client
                .instance(&instance)
                .exec(&request)
                .await
                .map_err(|e| e.to_string())?;
            let streams = session.attach(client).await.map_err(|e| e.to_string())?;
            let operation = streams.operation().clone();

            streams
                .pump(tokio::io::stdin(), tokio::io::stdout(), tokio::io::stderr())
                .await
                .map_err(|e| e.to_string())?;

            let outcome = client
                .wait_exec(&operation)
                .await
                .map_err(|e| e.to_string())?;
            return Ok(ExitCode::from(outcome.exit_code.clamp(0, 255) as u8));
        }

        Command::Push {
            instance,
            local,
            remote,
            uid,
            gid,
            mode,
        } => {
            let file = tokio::fs::File::open(&local)
                .await
                .map_err(|e| format!("Failed to open {}: {}", local, e))?;
            let header = FileHeader {
                uid,
                gid,
                mode,
                ..FileHeader::default()
            };
            client
                .instance(&instance)
                .write_file(&remote, file, header)
                .await
                .map_err(|e| e.to_string())?;
            println!("Pushed {} to {}:{}", local, instance, remote);
        }

        Command::Pull { instance, remote } => {
            let handle = client
                .instance(&instance)
                .read_file(&remote)
                .await
                .map_err(|e| e.to_string())?;
            match handle.content {
                FileContent::Directory(entries) => {
                    for entry in entries {
                        println!("{}", entry);
                    }
                }
                FileContent::File(mut reader) => {
                    let mut stdout = tokio::io::stdout();
                    tokio::io::copy(&mut reader, &mut stdout)
                        .await
                        .map_err(|e| e.to_string())?;
                    stdout.flush().await.map_err(|e| e.to_string())?;
                }
            }
        }

        Command::Forwards { network } => {
            let forwards = client
                .network(&network)
                .forwards()
                .await
                .map_err(|e| e.to_string())?;
            println!(
                "{}",
                serde_json::to_string_pretty(&forwards).map_err(|e| e.to_string())?
            );
        }

        Command::Forward {
            network,
            listen_address,
            port,
            target_address,
            target_port,
            udp,
        } => {
            let network = client.network(&network);
            let mut entry = ForwardPort::tcp(port, target_address);
            if let Some(target_port) = target_port {
                entry = entry.with_target_port(target_port);
            }
            if udp {
                entry = entry.with_protocol(Protocol::Udp);
            }

            match network.forward(&listen_address).await {
                Ok(mut forward) => {
                    forward.ports.retain(|p| {
                        p.listen_port != entry.listen_port || p.protocol != entry.protocol
                    });
                    forward.ports.push(entry);
                    network
                        .update_forward(&forward)
                        .await
                        .map_err(|e| e.to_string())?;
                    println!("Updated forward {}", listen_address);
                }
                Err(e) if e.is_not_found() => {
                    let forward = ForwardAddress::new(listen_address.clone()).with_port(entry);
                    network
                        .create_forward(&forward)
                        .await
                        .map_err(|e| e.to_string())?;
                    println!("Created forward {}", listen_address);
                }
                Err(e) => return Err(e.to_string()),
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
