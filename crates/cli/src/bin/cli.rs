// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2025 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

use std::process::ExitCode;

use clap::Parser;
use cverifier_cli::{logging::init_tracing, opt::CverifierCli};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = CverifierCli::parse();

    if let Err(e) = init_tracing(cli.log_level.as_deref()) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match cverifier_cli::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Error executing CVerifier CLI: {e:#}");
            ExitCode::FAILURE
        }
    }
}
