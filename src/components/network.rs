//! Virtual network: public/private subnets, or isolated subnets reaching
//! services through private endpoints.

use super::Naming;
use crate::core::error::Result;
use crate::core::template::{get_att, reference, sub, ResourceDescriptor, Template};
use crate::core::types::{EnvironmentConfig, NetworkAccess};
use serde_json::{json, Value};

const VPC_CIDR: &str = "10.0.0.0/16";
const AZ_COUNT: usize = 2;

/// Logical ids declared by the network component.
#[derive(Debug, Clone)]
pub struct NetworkOutputs {
    pub vpc: String,
    pub mode: NetworkAccess,
    /// Subnets workloads run in: private in public mode, isolated otherwise
    pub workload_subnets: Vec<String>,
    pub public_subnets: Vec<String>,
    pub security_group: String,
    pub endpoints: Vec<String>,
}

pub fn declare(template: &mut Template, config: &EnvironmentConfig) -> Result<NetworkOutputs> {
    let naming = Naming::new(config);
    let mode = config.network_mode();

    let vpc = template.add(
        "Vpc",
        ResourceDescriptor::new(
            "AWS::EC2::VPC",
            json!({
                "CidrBlock": VPC_CIDR,
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "Tags": with_name(&naming, "vpc"),
            }),
        ),
    )?;

    let security_group = template.add(
        "WorkloadSecurityGroup",
        ResourceDescriptor::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": "Studio workloads and private service endpoints",
                "VpcId": reference(&vpc),
                "Tags": with_name(&naming, "workloads"),
            }),
        ),
    )?;
    // studio apps and endpoints talk to each other freely inside the group
    template.add(
        "WorkloadSecurityGroupSelfIngress",
        ResourceDescriptor::new(
            "AWS::EC2::SecurityGroupIngress",
            json!({
                "GroupId": get_att(&security_group, "GroupId"),
                "SourceSecurityGroupId": get_att(&security_group, "GroupId"),
                "IpProtocol": "-1",
                "Description": "intra-group traffic",
            }),
        ),
    )?;

    let outputs = match mode {
        NetworkAccess::Public => declare_public(template, &naming, &vpc, &security_group)?,
        NetworkAccess::Isolated => {
            declare_isolated(template, config, &naming, &vpc, &security_group)?
        }
    };
    tracing::info!(
        mode = %mode,
        subnets = outputs.workload_subnets.len(),
        endpoints = outputs.endpoints.len(),
        "network declared"
    );
    Ok(outputs)
}

fn declare_public(
    template: &mut Template,
    naming: &Naming,
    vpc: &str,
    security_group: &str,
) -> Result<NetworkOutputs> {
    let igw = template.add(
        "InternetGateway",
        ResourceDescriptor::new(
            "AWS::EC2::InternetGateway",
            json!({ "Tags": with_name(naming, "igw") }),
        ),
    )?;
    let attachment = template.add(
        "InternetGatewayAttachment",
        ResourceDescriptor::new(
            "AWS::EC2::VPCGatewayAttachment",
            json!({ "VpcId": reference(vpc), "InternetGatewayId": reference(&igw) }),
        ),
    )?;

    let public_rt = route_table(template, naming, vpc, "PublicRouteTable", "public")?;
    template.add(
        "PublicDefaultRoute",
        ResourceDescriptor::new(
            "AWS::EC2::Route",
            json!({
                "RouteTableId": reference(&public_rt),
                "DestinationCidrBlock": "0.0.0.0/0",
                "GatewayId": reference(&igw),
            }),
        )
        .depends_on(&attachment),
    )?;

    let mut public_subnets = Vec::new();
    for az in 0..AZ_COUNT {
        let id = subnet(template, naming, vpc, "Public", az, &format!("10.0.{}.0/24", az), true)?;
        associate(template, &id, &public_rt)?;
        public_subnets.push(id);
    }

    let eip = template.add(
        "NatEip",
        ResourceDescriptor::new("AWS::EC2::EIP", json!({ "Domain": "vpc" })).depends_on(&attachment),
    )?;
    let nat = template.add(
        "NatGateway",
        ResourceDescriptor::new(
            "AWS::EC2::NatGateway",
            json!({
                "AllocationId": get_att(&eip, "AllocationId"),
                "SubnetId": reference(&public_subnets[0]),
                "Tags": with_name(naming, "nat"),
            }),
        ),
    )?;

    let private_rt = route_table(template, naming, vpc, "PrivateRouteTable", "private")?;
    template.add(
        "PrivateDefaultRoute",
        ResourceDescriptor::new(
            "AWS::EC2::Route",
            json!({
                "RouteTableId": reference(&private_rt),
                "DestinationCidrBlock": "0.0.0.0/0",
                "NatGatewayId": reference(&nat),
            }),
        ),
    )?;

    let mut private_subnets = Vec::new();
    for az in 0..AZ_COUNT {
        let cidr = format!("10.0.{}.0/20", 16 * (az + 1));
        let id = subnet(template, naming, vpc, "Private", az, &cidr, false)?;
        associate(template, &id, &private_rt)?;
        private_subnets.push(id);
    }

    let s3 = storage_gateway_endpoint(template, vpc, &private_rt)?;

    Ok(NetworkOutputs {
        vpc: vpc.to_string(),
        mode: NetworkAccess::Public,
        workload_subnets: private_subnets,
        public_subnets,
        security_group: security_group.to_string(),
        endpoints: vec![s3],
    })
}

fn declare_isolated(
    template: &mut Template,
    config: &EnvironmentConfig,
    naming: &Naming,
    vpc: &str,
    security_group: &str,
) -> Result<NetworkOutputs> {
    let isolated_rt = route_table(template, naming, vpc, "IsolatedRouteTable", "isolated")?;
    let mut isolated_subnets = Vec::new();
    for az in 0..AZ_COUNT {
        let cidr = format!("10.0.{}.0/20", 16 * (az + 1));
        let id = subnet(template, naming, vpc, "Isolated", az, &cidr, false)?;
        associate(template, &id, &isolated_rt)?;
        isolated_subnets.push(id);
    }

    let mut endpoints = vec![storage_gateway_endpoint(template, vpc, &isolated_rt)?];
    for service in interface_services(config) {
        let id = format!("{}Endpoint", pascal_case(service));
        template.add(
            &id,
            ResourceDescriptor::new(
                "AWS::EC2::VPCEndpoint",
                json!({
                    "VpcId": reference(vpc),
                    "ServiceName": sub(&format!("com.amazonaws.${{AWS::Region}}.{}", service)),
                    "VpcEndpointType": "Interface",
                    "PrivateDnsEnabled": true,
                    "SubnetIds": isolated_subnets.iter().map(|s| reference(s)).collect::<Vec<_>>(),
                    "SecurityGroupIds": [get_att(security_group, "GroupId")],
                }),
            ),
        )?;
        endpoints.push(id);
    }

    Ok(NetworkOutputs {
        vpc: vpc.to_string(),
        mode: NetworkAccess::Isolated,
        workload_subnets: isolated_subnets,
        public_subnets: Vec::new(),
        security_group: security_group.to_string(),
        endpoints,
    })
}

/// Interface endpoints isolated subnets need, limited to enabled services.
pub fn interface_services(config: &EnvironmentConfig) -> Vec<&'static str> {
    let features = &config.features;
    let mut services = vec!["sts", "logs", "sagemaker.api", "sagemaker.runtime"];
    if features.catalog {
        services.push("glue");
    }
    if features.query_engine {
        services.push("athena");
    }
    if features.generative_ai {
        services.push("bedrock-runtime");
    }
    if features.knowledge_base_active() {
        services.push("bedrock-agent-runtime");
    }
    if features.data_ingestion {
        services.push("lambda");
    }
    services
}

fn storage_gateway_endpoint(template: &mut Template, vpc: &str, route_table: &str) -> Result<String> {
    template.add(
        "StorageGatewayEndpoint",
        ResourceDescriptor::new(
            "AWS::EC2::VPCEndpoint",
            json!({
                "VpcId": reference(vpc),
                "ServiceName": sub("com.amazonaws.${AWS::Region}.s3"),
                "VpcEndpointType": "Gateway",
                "RouteTableIds": [reference(route_table)],
            }),
        ),
    )
}

fn route_table(
    template: &mut Template,
    naming: &Naming,
    vpc: &str,
    logical_id: &str,
    purpose: &str,
) -> Result<String> {
    template.add(
        logical_id,
        ResourceDescriptor::new(
            "AWS::EC2::RouteTable",
            json!({ "VpcId": reference(vpc), "Tags": with_name(naming, purpose) }),
        ),
    )
}

fn subnet(
    template: &mut Template,
    naming: &Naming,
    vpc: &str,
    tier: &str,
    az: usize,
    cidr: &str,
    public: bool,
) -> Result<String> {
    let id = format!("{}Subnet{}", tier, az + 1);
    template.add(
        &id,
        ResourceDescriptor::new(
            "AWS::EC2::Subnet",
            json!({
                "VpcId": reference(vpc),
                "CidrBlock": cidr,
                "AvailabilityZone": { "Fn::Select": [az, { "Fn::GetAZs": "" }] },
                "MapPublicIpOnLaunch": public,
                "Tags": with_name(naming, &format!("{}-{}", tier.to_lowercase(), az + 1)),
            }),
        ),
    )
}

fn associate(template: &mut Template, subnet: &str, route_table: &str) -> Result<String> {
    template.add(
        &format!("{}RouteTableAssociation", subnet),
        ResourceDescriptor::new(
            "AWS::EC2::SubnetRouteTableAssociation",
            json!({ "SubnetId": reference(subnet), "RouteTableId": reference(route_table) }),
        ),
    )
}

fn with_name(naming: &Naming, purpose: &str) -> Value {
    let mut tags = naming.tag_map();
    tags.shift_insert(0, "Name".to_string(), naming.resource(purpose));
    crate::core::template::tags(&tags)
}

fn pascal_case(service: &str) -> String {
    service
        .split(['.', '-'])
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
