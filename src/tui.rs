use std::io;
use color_eyre::{eyre::{Result, Context}, owo_colors::OwoColorize};
use zxcvbn::zxcvbn;

use crate::user_manager::SetupCode;

pub fn get_password() -> Result<String, io::Error>
{
  let mut password;
  let mut confirm_password;
  loop
  {
    password = rpassword::prompt_password("New password: ")?;
    match zxcvbn(&password, &[])
    {
      Ok(entropy) =>
      {
        let score = entropy.score();
        let meter = "▮".repeat(score.into()) + &"▯".repeat((4 - score).into());
        let meter = match score
        {
          0 => meter.red().to_string(),
          1 => meter.yellow().to_string(),
          2 => meter.bright_yellow().to_string(),
          _ => meter.green().to_string()
        };
        let crack = entropy.crack_times();
        println!("Strength: {} (online crack time: {}, offline crack time: {})", meter, crack.online_throttling_100_per_hour(), crack.offline_slow_hashing_1e4_per_second());
        if let Some(feedback) = entropy.feedback()
        {
          if let Some(warning) = feedback.warning()
          {
            println!("{}", warning.red());
          }
        }
        if score < 3
        {
          println!("Password is too weak - try again");
          continue;
        }
      },
      Err(_) => continue
    }
    confirm_password = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm_password
    {
      eprintln!("Passwords do not match!");
    }
    else
    {
      return Ok(password);
    }
  }
}

pub fn maybe_show_qr_code(code: SetupCode, show: bool) -> Result<()>
{
  if show
  {
    println!("{}", code.get_qr_code().wrap_err("failed to generate qr code")?);
  }
  else
  {
    println!("{}", code.get_raw_code());
  }
  Ok(())
}
