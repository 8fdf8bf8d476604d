use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::ListParams;
use kube::{Api, Client};

use pepr_report::crd::Exemption;
use pepr_report::report::{ClusterPolicyReport, REPORT_NAME};

pub async fn run() -> anyhow::Result<()> {
    println!("Running cluster connectivity checks...\n");

    // 1. Build Kubernetes client from kubeconfig
    print!("  Kubeconfig .................. ");
    let client = match Client::try_default().await {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot load kubeconfig: {}", e);
        }
    };

    // 2. Verify actual cluster connectivity by fetching server version
    print!("  Cluster connection .......... ");
    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            println!("\n  Error: {}", e);
            println!("  Hint:  Is the cluster running? Check with: kubectl cluster-info\n");
            return Ok(());
        }
    }

    // 3. Required CRDs
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());

    print!("  Exemption CRD ............... ");
    match crds.get("exemptions.uds.dev").await {
        Ok(_) => println!("OK"),
        Err(_) => println!("MISSING (run: pepr-report crd install)"),
    }

    print!("  ClusterPolicyReport CRD ..... ");
    match crds.get("clusterpolicyreports.wgpolicyk8s.io").await {
        Ok(_) => println!("OK"),
        Err(_) => println!("MISSING (install the wgpolicyk8s.io CRDs)"),
    }

    // 4. List exemptions permission
    print!("  List exemptions permission .. ");
    let exemptions: Api<Exemption> = Api::all(client.clone());
    match exemptions.list(&ListParams::default().limit(1)).await {
        Ok(_) => println!("OK"),
        Err(e) => println!("FAIL ({})", e),
    }

    // 5. Current report, if any
    print!("  Current report .............. ");
    let reports: Api<ClusterPolicyReport> = Api::all(client.clone());
    match reports.get(REPORT_NAME).await {
        Ok(report) => println!(
            "present ({} results, {} tracked policies)",
            report.results.len(),
            report.summary.total()
        ),
        Err(kube::Error::Api(e)) if e.code == 404 => println!("absent"),
        Err(e) => println!("FAIL ({})", e),
    }

    println!("\nAll checks completed.");
    Ok(())
}
