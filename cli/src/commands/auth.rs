use anyhow::Result;
use std::process;

use stride_core::service::StrideService;

use super::helpers::{auth_failure, json_error, prompt_password};

fn password_or_prompt(password: Option<String>) -> Result<String> {
    match password {
        Some(p) => Ok(p),
        None => prompt_password("Password"),
    }
}

pub(crate) fn cmd_sign_up(
    svc: &StrideService,
    email: &str,
    password: Option<String>,
    json: bool,
) -> Result<()> {
    let password = password_or_prompt(password)?;
    let user = svc.sign_up(email, &password).map_err(auth_failure)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&user)?);
    } else {
        println!("Account created. Signed in as {}", user.email);
    }
    Ok(())
}

pub(crate) fn cmd_sign_in(
    svc: &StrideService,
    email: &str,
    password: Option<String>,
    json: bool,
) -> Result<()> {
    let password = password_or_prompt(password)?;
    let user = svc.sign_in(email, &password).map_err(auth_failure)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&user)?);
    } else {
        println!("Signed in as {}", user.email);
    }
    Ok(())
}

pub(crate) fn cmd_sign_out(svc: &StrideService, json: bool) -> Result<()> {
    let was = svc.current_user();
    svc.sign_out().map_err(auth_failure)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "signed_out": was.as_ref().map(|u| u.email.as_str()) })
        );
    } else if let Some(user) = was {
        println!("Signed out {}", user.email);
    } else {
        println!("Not signed in");
    }
    Ok(())
}

pub(crate) fn cmd_whoami(svc: &StrideService, json: bool) -> Result<()> {
    if let Some(user) = svc.current_user() {
        if json {
            println!("{}", serde_json::to_string_pretty(&user)?);
        } else {
            println!("{} ({})", user.email, user.uid);
        }
        Ok(())
    } else {
        if json {
            println!("{}", json_error("Not signed in"));
        } else {
            eprintln!("Not signed in. Use `stride auth sign-in` or `stride auth sign-up`.");
        }
        process::exit(2);
    }
}
